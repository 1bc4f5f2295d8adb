use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use baton_tokens::{authority::dto::ErrorResponse, JwtSigningError};
use thiserror::Error;

/// A failure reported to the client as `{"message": …}`
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was incomplete or the credentials were wrong
    #[error("{0}")]
    BadRequest(String),
    /// A bearer or refresh token was missing or not accepted
    #[error("{0}")]
    Unauthorized(&'static str),
    /// No such route
    #[error("page not found")]
    NotFound,
    /// A token could not be signed
    #[error("unable to issue tokens")]
    Signing(#[from] JwtSigningError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(%status, message = %self, "request refused");
        }

        let body = ErrorResponse {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
