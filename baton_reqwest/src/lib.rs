//! Middleware to attach session tokens to outgoing requests and renew them
//! when they are rejected
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`RequestGate`] in the middleware stack to send the current
//! access token of a [`SessionManager`] with each outbound request.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! A `401 Unauthorized` response is taken to mean that the access token is no
//! longer accepted. The gate then:
//!
//! 1. cancels every other in-flight request sent with the same token, from
//!    any client of the same session,
//! 2. asks the session to renew the pair, joining any renewal already in
//!    flight, and
//! 3. retries the request exactly once with the new access token.
//!
//! Cancelled requests wait for the same renewal and are replayed once it
//! settles. A second rejection after a successful renewal, or a denied
//! renewal, is reported as a [`GateError`].
//!
//! ```
//! use baton_reqwest::RequestGate;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # async fn run(session: baton_tokens::SessionManager) -> Result<(), reqwest_middleware::Error> {
//! let client = ClientBuilder::new(Client::default())
//!     .with(RequestGate::new(session))
//!     .build();
//!
//! let resp = client
//!     .get("http://localhost:1234/me")
//!     .send()
//!     .await?;
//! # drop(resp);
//! # Ok(())
//! # }
//! ```
//!
//! By default, tokens are withheld from the login and registration
//! endpoints. A custom predicate can decide which requests receive a token
//! instead, and can be composed with the combinators from [`predicates`].
//!
//! ```
//! use baton_reqwest::{ExceptPaths, RequestGate};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! # fn build(session: baton_tokens::SessionManager) {
//! let gate = RequestGate::new(session)
//!     .with_predicate(ExceptPaths::auth_entry().and(ExceptPaths::new(["/health"])));
//! # drop(gate);
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use aliri_clock::{Clock, System};
use baton_tokens::{AccessTokenRef, Denial, RefreshOutcome, SessionManager};
use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use thiserror::Error;

/// A request that could not be completed by the gate
#[derive(Debug, Error)]
pub enum GateError {
    /// The request was cancelled because another request sent with the same
    /// access token was rejected, and it could not be replayed
    #[error("request cancelled after its access token was rejected")]
    Cancelled,
    /// The access token was rejected and the session could not be renewed
    ///
    /// By the time this is observed, the session has been cleared.
    #[error("access token rejected and the session could not be renewed")]
    Refresh(#[source] Denial),
    /// The request was rejected again after the session was renewed
    #[error("request rejected again after the session was renewed")]
    RejectedAfterRefresh,
}

impl GateError {
    /// Finds the gate error carried by a middleware error, if any
    pub fn find(err: &reqwest_middleware::Error) -> Option<&GateError> {
        match err {
            reqwest_middleware::Error::Middleware(inner) => inner.downcast_ref(),
            _ => None,
        }
    }
}

impl From<GateError> for reqwest_middleware::Error {
    fn from(err: GateError) -> Self {
        reqwest_middleware::Error::middleware(err)
    }
}

/// A middleware that attaches the session's access token to outgoing
/// requests and renews the session when a request is rejected
#[derive(Clone, Debug)]
pub struct RequestGate<P> {
    session: SessionManager,
    predicate: P,
    replay_cancelled: bool,
}

impl RequestGate<ExceptPaths> {
    /// Construct a new gate for a session
    ///
    /// By default, this middleware sends its token with every request
    /// except those to the login and registration endpoints. To change this
    /// behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            predicate: ExceptPaths::auth_entry(),
            replay_cancelled: true,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> RequestGate<P> {
        RequestGate {
            session: self.session,
            predicate,
            replay_cancelled: self.replay_cancelled,
        }
    }
}

impl<P> RequestGate<P> {
    /// Whether requests cancelled by another request's rejection are replayed
    /// once the session is renewed
    ///
    /// Enabled by default. When disabled, cancelled requests fail with
    /// [`GateError::Cancelled`].
    pub fn replay_cancelled(self, replay: bool) -> Self {
        Self {
            replay_cancelled: replay,
            ..self
        }
    }

    /// The session whose tokens are attached
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    fn attach(&self, req: &mut Request, token: &AccessTokenRef) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let now = System.now();
            match self.session.validator().inspect(token.as_str()) {
                Ok(claims) => tracing::trace!(
                    token.expiry = claims.expiry().0,
                    token.until_expired = claims.until_expired_at(now).as_secs(),
                    "attaching access token"
                ),
                Err(rejection) => {
                    tracing::trace!(%rejection, "attaching access token that does not validate")
                }
            }
        }

        match bearer(token) {
            Some(value) => {
                req.headers_mut().insert(header::AUTHORIZATION, value);
            }
            None => tracing::warn!("access token is not a valid header value, not attaching"),
        }
    }

    /// Sends a request, abandoning it if another request of the same wave is
    /// rejected first
    async fn send_tracked(
        &self,
        req: Request,
        token: &AccessTokenRef,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Sent {
        let registration = self.session.in_flight().register(token);

        tokio::select! {
            biased;
            _ = registration.cancelled() => Sent::Cancelled,
            result = next.run(req, extensions) => match result {
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => Sent::Rejected(resp),
                Ok(resp) => Sent::Done(resp),
                Err(err) => Sent::Failed(err),
            },
        }
    }

    /// Sends a request with a renewed token; a rejection here is final
    async fn retry(
        &self,
        mut req: Request,
        outcome: RefreshOutcome,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let renewed = match outcome {
            RefreshOutcome::Renewed(pair) => pair,
            RefreshOutcome::Denied(denial) => {
                tracing::debug!(%denial, "session could not be renewed");
                return Err(GateError::Refresh(denial).into());
            }
        };

        self.attach(&mut req, renewed.access());
        let resp = next.run(req, extensions).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("request rejected after renewal");
            return Err(GateError::RejectedAfterRefresh.into());
        }

        Ok(resp)
    }
}

enum Sent {
    Done(Response),
    Rejected(Response),
    Cancelled,
    Failed(reqwest_middleware::Error),
}

fn bearer(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze()).ok()?;
    value.set_sensitive(true);
    Some(value)
}

#[async_trait::async_trait]
impl<P> Middleware for RequestGate<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !self.predicate.eval(&req) || req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!(url = %req.url(), "not attaching access token");
            return next.run(req, extensions).await;
        }

        let Some(pair) = self.session.current() else {
            tracing::trace!(url = %req.url(), "no session, sending without access token");
            return next.run(req, extensions).await;
        };
        let sent_with = pair.access();

        let replay = req.try_clone();
        self.attach(&mut req, sent_with);

        match self
            .send_tracked(req, sent_with, extensions, next.clone())
            .await
        {
            Sent::Done(resp) => Ok(resp),
            Sent::Failed(err) => Err(err),
            Sent::Rejected(resp) => {
                let Some(replay) = replay else {
                    tracing::debug!("access token rejected, but the request cannot be retried");
                    return Ok(resp);
                };

                let cancelled = self.session.in_flight().cancel_wave(sent_with);
                tracing::debug!(cancelled, "access token rejected, renewing session");

                let outcome = self.session.refresh_stale(sent_with).await;
                self.retry(replay, outcome, extensions, next).await
            }
            Sent::Cancelled => {
                let replay = match replay {
                    Some(replay) if self.replay_cancelled => replay,
                    _ => {
                        tracing::debug!("request cancelled and will not be replayed");
                        return Err(GateError::Cancelled.into());
                    }
                };

                tracing::debug!("request cancelled, replaying after renewal");
                let outcome = self.session.refresh_stale(sent_with).await;
                self.retry(replay, outcome, extensions, next).await
            }
        }
    }
}

/// Only attach an access token if the request path does not end with one of
/// the given paths
///
/// Matching is on whole trailing path segments: excluding `/login` excludes
/// both `/login` and `/api/login`, but not `/relogin`.
#[derive(Clone, Debug)]
pub struct ExceptPaths {
    paths: Vec<String>,
}

impl ExceptPaths {
    /// Construct a new predicate from a set of paths
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            paths: paths.into_iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Excludes the login and registration endpoints
    pub fn auth_entry() -> Self {
        Self::new(["/login", "/register"])
    }

    fn excluded_by(&self, path: &str) -> Option<&str> {
        let path = path.trim_end_matches('/');
        self.paths
            .iter()
            .map(|p| p.trim_end_matches('/'))
            .find(|p| path.ends_with(p) && (p.starts_with('/') || path.len() == p.len()))
    }
}

impl Predicate<Request> for ExceptPaths {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        self.excluded_by(req.url().path()).is_none()
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            let mut case = reflection::Case::new(Some(self), result)
                .add_product(reflection::Product::new("path", req.url().path().to_owned()));
            if let Some(excluded) = self.excluded_by(req.url().path()) {
                case = case.add_product(reflection::Product::new("excluded", excluded.to_owned()));
            }
            Some(case)
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExceptPaths {}
impl fmt::Display for ExceptPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("path not in ")?;
        f.debug_list().entries(&self.paths).finish()
    }
}

#[cfg(test)]
mod tests;
