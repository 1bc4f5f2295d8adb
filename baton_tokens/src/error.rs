//! Errors and denial reasons

use std::sync::Arc;

use thiserror::Error;

/// The reason a token failed local validation
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TokenRejection {
    /// The token is missing, not a JWT, or its claims could not be read
    #[error("token is malformed")]
    Malformed,
    /// The token is authentic, but its `exp` claim has passed
    #[error("token has expired")]
    Expired,
    /// The token was not signed with the expected key and algorithm
    #[error("token signature is invalid")]
    SignatureInvalid,
}

/// Broad classification of a refresh denial
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialKind {
    /// The authority refused the refresh token, or issued something unusable
    RefreshDenied,
    /// The authority could not be reached in time
    UpstreamUnavailable,
}

/// Why a refresh did not produce a new token pair
///
/// A denial is terminal for the refresh token that was presented: by the time
/// a caller observes one, the session has already been cleared.
#[derive(Clone, Debug, Error)]
pub enum Denial {
    /// There is no session to refresh
    #[error("no session is present")]
    NoSession,
    /// The authority refused the refresh token
    #[error("authority rejected the refresh token ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the authority
        status: u16,
        /// Message returned by the authority
        message: String,
    },
    /// The authority answered, but the issued pair cannot be used
    #[error("authority issued an unusable token pair: {0}")]
    InvalidPair(Arc<str>),
    /// The authority could not be reached
    #[error("authority unavailable: {0}")]
    Unavailable(Arc<str>),
    /// The authority did not answer within the refresh timeout
    #[error("refresh timed out")]
    Timeout,
    /// The refresh ended without an answer, because its task was torn down or
    /// the authority panicked
    #[error("refresh was abandoned before completing")]
    Abandoned,
}

impl Denial {
    /// Classifies the denial
    pub fn kind(&self) -> DenialKind {
        match self {
            Self::NoSession | Self::Rejected { .. } | Self::InvalidPair(_) => {
                DenialKind::RefreshDenied
            }
            Self::Unavailable(_) | Self::Timeout | Self::Abandoned => {
                DenialKind::UpstreamUnavailable
            }
        }
    }

    pub(crate) fn invalid_pair(reason: impl std::fmt::Display) -> Self {
        Self::InvalidPair(reason.to_string().into())
    }

    pub(crate) fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::Unavailable(reason.to_string().into())
    }
}

/// An error reading or writing persisted tokens
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be accessed
    #[error("token storage unavailable")]
    Io(#[from] std::io::Error),
    /// The persisted tokens could not be encoded or decoded
    #[error("persisted tokens are unreadable")]
    Format(#[from] serde_json::Error),
}
