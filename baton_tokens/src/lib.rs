//! Client-side management of access/refresh token pairs
//!
//! A session holds a short-lived access token and the longer-lived refresh
//! token issued alongside it. This crate keeps that pair valid for as long as
//! the authority is willing to renew it, and ends the session cleanly when it
//! is not.
//!
//! The [`SessionManager`] is the context object through which everything
//! flows. It persists the current pair in a [`TokenStore`], obtains new pairs
//! from a [`TokenAuthority`], and verifies access tokens locally with a
//! [`TokenValidator`].
//!
//! Renewals are single-flight: however many callers notice an expired access
//! token at the same moment, the authority sees exactly one refresh request,
//! and every caller receives the same [`RefreshOutcome`]. A denied refresh
//! clears the session, so later callers observe the denial without contacting
//! the authority again.
//!
//! ```no_run
//! use baton_tokens::{
//!     Credentials, FileTokenStore, HttpAuthority, Navigation, RenewalWatcher, SessionBoundary,
//!     SessionManager, TokenValidator,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let authority = HttpAuthority::new(reqwest::Client::new(), "http://localhost:1234/".parse()?);
//! let session = SessionManager::builder(authority, TokenValidator::hs256(b"mysecretkey"))
//!     .with_store(FileTokenStore::new("session.json"))
//!     .restore()
//!     .await?;
//!
//! if session.current().is_none() {
//!     session.login(&Credentials::new("admin", "password123")).await?;
//! }
//!
//! // Renew in the background before the access token goes stale
//! let _renewal = RenewalWatcher::spawn_default(session.clone());
//!
//! let boundary = SessionBoundary::new(session);
//! assert_eq!(boundary.navigate("/aboutme").await, Navigation::Proceed);
//! # Ok(())
//! # }
//! ```
//!
//! Requests made with `reqwest` can have tokens attached, and rejected
//! requests renewed and retried, by the middleware in the `baton_reqwest`
//! crate.
//!
//! # Features
//!
//! * `file` (default): A token store using the local filesystem.
//! * `http` (default): A token authority reached over HTTP with [reqwest].
//! * `rand` (default): A [`JitterSource`][renewal::JitterSource] based on the
//!   random number generator provided by the [rand] crate.
//! * `cookies`: A token store backed by a `reqwest` cookie jar.

#![cfg_attr(docsrs, feature(doc_cfg))]
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

pub mod authority;
mod boundary;
mod braids;
mod coordinator;
mod error;
pub mod in_flight;
mod issuer;
pub mod renewal;
mod session;
pub mod store;
mod tokens;
mod validator;

#[cfg(test)]
mod test_support;

pub use authority::{AuthorityError, TokenAuthority};
pub use boundary::{Navigation, RouteRules, SessionBoundary};
pub use braids::*;
pub use coordinator::RefreshOutcome;
pub use error::{Denial, DenialKind, StoreError, TokenRejection};
pub use in_flight::InFlight;
pub use issuer::{JwtSigningError, TokenIssuer};
pub use renewal::{RenewalHandle, RenewalWatcher};
pub use session::{LoginError, PairReceiver, SessionBuilder, SessionManager};
pub use store::{InMemoryTokenStore, TokenStore};
pub use tokens::{Credentials, RenewalSchedule, SessionClaims, TokenPair, TokenStatus};
pub use validator::TokenValidator;

#[cfg(feature = "http")]
pub use authority::HttpAuthority;
#[cfg(feature = "cookies")]
pub use store::CookieTokenStore;
#[cfg(feature = "file")]
pub use store::FileTokenStore;
