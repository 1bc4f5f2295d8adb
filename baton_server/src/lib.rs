//! A demo authority for `baton` sessions
//!
//! Issues access/refresh token pairs for a small in-memory user list, and
//! rotates refresh tokens on every use.
//!
//! | Route | Behavior |
//! |---|---|
//! | `POST /login` | `{username, password}` → `{access_token, refresh_token}` |
//! | `POST /register` | `{username, password}` → `201 {message, content}` |
//! | `POST /refresh` | bearer access token (may be expired) and `{refreshToken}` → new pair |
//! | `GET /me` | valid bearer access token → `{content: claims}` |
//!
//! Every failure is answered with `{message}`: `400` for incomplete requests
//! or bad credentials, `401` for missing or unaccepted tokens, and `404` for
//! unknown routes.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod config;
mod error;
mod routes;
mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, User};

use tokio::net::TcpListener;

/// Serves the authority on `listener` until `shutdown` completes
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tracing::info!(addr = ?listener.local_addr()?, "authority listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
