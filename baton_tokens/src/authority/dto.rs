//! DTOs for interacting with the authority

use serde::{Deserialize, Serialize};

use crate::{AccessToken, RefreshToken, RefreshTokenRef};

/// The body of a refresh request
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    /// The refresh token being exchanged
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a RefreshTokenRef,
}

/// A successful token response
///
/// Both fields are optional on the wire so that a partial response can be
/// reported precisely instead of as a parse failure.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The newly issued access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    /// The newly issued refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
}

/// An error response
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// A human-readable explanation
    pub message: String,
}
