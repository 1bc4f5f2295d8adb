//! Minting of signed token pairs
//!
//! The authority side of the exchange. Clients never need this; it exists so
//! that an authority (and tests standing in for one) can mint tokens that a
//! [`TokenValidator`] sharing the same secret will accept.

use std::time::Duration;

use aliri::{jwa, jwt, Jwt};
use aliri_clock::{Clock, System, UnixTime};

use crate::{tokens::SessionClaims, TokenPair, TokenValidator};

pub use aliri::error::JwtSigningError;

/// Signs access and refresh tokens with a shared HS256 secret
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    validator: TokenValidator,
    headers: jwt::BasicHeaders,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Default lifetime of an access token
    pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(60 * 60);
    /// Default lifetime of a refresh token
    pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Issues HS256 tokens signed with `secret`
    pub fn hs256(secret: impl AsRef<[u8]>) -> Self {
        Self {
            validator: TokenValidator::hs256(secret),
            headers: jwt::BasicHeaders::new(jwa::Algorithm::HS256),
            access_ttl: Self::DEFAULT_ACCESS_TTL,
            refresh_ttl: Self::DEFAULT_REFRESH_TTL,
        }
    }

    /// Sets the lifetime of issued access tokens
    pub fn with_access_ttl(self, access_ttl: Duration) -> Self {
        Self { access_ttl, ..self }
    }

    /// Sets the lifetime of issued refresh tokens
    pub fn with_refresh_ttl(self, refresh_ttl: Duration) -> Self {
        Self {
            refresh_ttl,
            ..self
        }
    }

    /// A validator that accepts the tokens this issuer signs
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Signs an arbitrary set of claims
    ///
    /// # Errors
    ///
    /// Returns an error if the claims could not be serialized or signed.
    pub fn sign(&self, claims: &SessionClaims) -> Result<Jwt, JwtSigningError> {
        Jwt::try_from_parts_with_signature(&self.headers, claims, self.validator.key())
    }

    /// Issues a fresh pair for the given subject, valid from now
    ///
    /// # Errors
    ///
    /// Returns an error if either token could not be signed.
    pub fn issue_pair(
        &self,
        subject: &str,
        username: &str,
    ) -> Result<(TokenPair, SessionClaims), JwtSigningError> {
        self.issue_pair_at(subject, username, System.now())
    }

    /// Issues a pair for the given subject, valid from `issued`
    ///
    /// Returns the claims of the refresh token alongside the pair.
    ///
    /// # Errors
    ///
    /// Returns an error if either token could not be signed.
    pub fn issue_pair_at(
        &self,
        subject: &str,
        username: &str,
        issued: UnixTime,
    ) -> Result<(TokenPair, SessionClaims), JwtSigningError> {
        let access = SessionClaims::new(subject, username, issued, self.access_ttl);
        let refresh = SessionClaims::new(subject, username, issued, self.refresh_ttl);

        let pair = TokenPair::new(
            self.sign(&access)?.take(),
            self.sign(&refresh)?.take(),
        );

        tracing::debug!(subject, jti = refresh.token_id(), "issued token pair");
        Ok((pair, refresh))
    }
}
