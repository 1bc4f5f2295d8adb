use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;

use crate::{
    AccessTokenRef, AuthorityError, Credentials, RefreshTokenRef, SessionClaims, TokenAuthority,
    TokenIssuer, TokenPair,
};

pub(crate) const SECRET: &[u8] = b"test-secret";

pub(crate) fn issuer() -> TokenIssuer {
    TokenIssuer::hs256(SECRET)
}

pub(crate) fn fresh_pair() -> TokenPair {
    issuer().issue_pair("1", "admin").unwrap().0
}

/// A pair whose access token expired an hour ago but whose refresh token is
/// still good
pub(crate) fn expired_pair() -> TokenPair {
    let issuer = issuer();
    let now = System.now();
    let access = SessionClaims::new(
        "1",
        "admin",
        UnixTime(now.0 - 7_200),
        Duration::from_secs(3_600),
    );
    let refresh = SessionClaims::new("1", "admin", now, TokenIssuer::DEFAULT_REFRESH_TTL);

    TokenPair::new(
        issuer.sign(&access).unwrap().take(),
        issuer.sign(&refresh).unwrap().take(),
    )
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum StubMode {
    Issue,
    Reject,
    Garbage,
    Hang,
    Panic,
}

/// An authority that answers from memory and counts its calls
///
/// The configured delay applies to refreshes only.
#[derive(Debug)]
pub(crate) struct StubAuthority {
    mode: Mutex<StubMode>,
    delay: Duration,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl StubAuthority {
    pub(crate) fn new() -> Self {
        Self {
            mode: Mutex::new(StubMode::Issue),
            delay: Duration::ZERO,
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_mode(self, mode: StubMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub(crate) fn set_mode(&self, mode: StubMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, delay: Duration) -> Result<TokenPair, AuthorityError> {
        let mode = *self.mode.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match mode {
            StubMode::Issue => Ok(fresh_pair()),
            StubMode::Reject => Err(AuthorityError::Rejected {
                status: 401,
                message: "invalid refresh token".into(),
            }),
            StubMode::Garbage => Ok(TokenPair::new("not-a-jwt", "not-a-jwt")),
            StubMode::Hang => std::future::pending().await,
            StubMode::Panic => panic!("authority failed unexpectedly"),
        }
    }
}

#[async_trait]
impl TokenAuthority for StubAuthority {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, AuthorityError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.username().as_str() != "admin"
            || credentials.password().as_str() != "password123"
        {
            return Err(AuthorityError::Rejected {
                status: 400,
                message: "invalid username or password".into(),
            });
        }
        self.respond(Duration::ZERO).await
    }

    async fn refresh(
        &self,
        _bearer: Option<&AccessTokenRef>,
        _refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, AuthorityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(self.delay).await
    }
}
