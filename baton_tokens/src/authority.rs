//! The authority that issues and renews token pairs

use std::error;

use async_trait::async_trait;
use thiserror::Error;

use crate::{AccessTokenRef, Credentials, Denial, RefreshTokenRef, TokenPair};

pub mod dto;
#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpAuthority;

/// An authority able to exchange credentials or a refresh token for a new
/// token pair
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Exchanges a username and password for a token pair
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, AuthorityError>;

    /// Exchanges a refresh token for a new token pair
    ///
    /// The access token the refresh token was issued with, if still known, is
    /// presented as the bearer of the request.
    async fn refresh(
        &self,
        bearer: Option<&AccessTokenRef>,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, AuthorityError>;
}

#[async_trait]
impl<T: TokenAuthority + ?Sized> TokenAuthority for std::sync::Arc<T> {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, AuthorityError> {
        (**self).login(credentials).await
    }

    async fn refresh(
        &self,
        bearer: Option<&AccessTokenRef>,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, AuthorityError> {
        (**self).refresh(bearer, refresh_token).await
    }
}

/// An error while requesting tokens from the authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The authority answered with an error status
    #[error("authority rejected the request ({status}): {message}")]
    Rejected {
        /// The HTTP status code
        status: u16,
        /// The message returned by the authority
        message: String,
    },
    /// The authority could not be reached, or its response could not be read
    #[error("unable to reach authority")]
    Unreachable(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// The authority answered successfully, but without both tokens
    #[error("authority response did not include both tokens")]
    MissingTokens,
}

impl AuthorityError {
    /// Whether the authority explicitly refused the request
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<AuthorityError> for Denial {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Rejected { status, message } => Denial::Rejected { status, message },
            AuthorityError::Unreachable(source) => Denial::unavailable(source),
            err @ (AuthorityError::TokenBody(_) | AuthorityError::MissingTokens) => {
                Denial::invalid_pair(err)
            }
        }
    }
}
