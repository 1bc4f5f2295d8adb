use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use baton_tokens::{
    AccessTokenRef, PasswordRef, RefreshTokenRef, TokenIssuer, TokenPair, TokenRejection,
    TokenValidator, UsernameRef,
};
use serde::Serialize;

use crate::ApiError;

/// A registered user
#[derive(Clone, Debug, Serialize)]
pub struct User {
    /// Numeric identifier, used as the token subject
    pub id: u64,
    /// The name the user logs in with
    pub username: String,
    #[serde(skip)]
    password: String,
}

#[derive(Debug)]
struct Inner {
    issuer: TokenIssuer,
    lenient: TokenValidator,
    users: Mutex<Vec<User>>,
    refresh_allowlist: Mutex<HashSet<String>>,
}

/// Shared state of the authority: its users, its signing key, and the
/// refresh tokens it will still honor
#[derive(Clone, Debug)]
pub struct AppState {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    /// State seeded with the `admin` user
    pub fn new(issuer: TokenIssuer) -> Self {
        let lenient = issuer.validator().ignoring_expiry();
        let admin = User {
            id: 1,
            username: "admin".into(),
            password: "password123".into(),
        };

        Self {
            inner: Arc::new(Inner {
                issuer,
                lenient,
                users: Mutex::new(vec![admin]),
                refresh_allowlist: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Verifies signature and expiry of an access token
    pub fn validator(&self) -> &TokenValidator {
        self.inner.issuer.validator()
    }

    /// Finds the user with matching credentials
    pub fn authenticate(&self, username: &UsernameRef, password: &PasswordRef) -> Option<User> {
        lock(&self.inner.users)
            .iter()
            .find(|u| u.username == username.as_str() && u.password == password.as_str())
            .cloned()
    }

    /// Adds a new user
    ///
    /// Fails if the name is already taken.
    pub fn register(&self, username: &UsernameRef, password: &PasswordRef) -> Result<User, ApiError> {
        let mut users = lock(&self.inner.users);
        if users.iter().any(|u| u.username == username.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "user {} already existing",
                username
            )));
        }

        let id = users.last().map_or(1, |u| u.id + 1);
        let user = User {
            id,
            username: username.as_str().to_owned(),
            password: password.as_str().to_owned(),
        };
        users.push(user.clone());

        tracing::info!(id, username = %username, "user registered");
        Ok(user)
    }

    /// Issues a fresh pair for `user` and allows its refresh token
    pub fn issue(&self, user: &User) -> Result<TokenPair, ApiError> {
        self.issue_for(&user.id.to_string(), &user.username)
    }

    fn issue_for(&self, subject: &str, username: &str) -> Result<TokenPair, ApiError> {
        let (pair, _) = self.inner.issuer.issue_pair(subject, username)?;
        lock(&self.inner.refresh_allowlist).insert(pair.refresh().as_str().to_owned());
        Ok(pair)
    }

    /// Exchanges a refresh token for a new pair
    ///
    /// The bearer must carry a valid signature, but may have expired. The
    /// refresh token must be unexpired, still allowed, and issued to the same
    /// subject as the bearer. It is removed from the allowlist whether or not
    /// the new pair can be issued.
    pub fn rotate(
        &self,
        bearer: &AccessTokenRef,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, ApiError> {
        const BAD_TOKEN: ApiError = ApiError::Unauthorized("bad token");

        let bearer_claims = self
            .inner
            .lenient
            .inspect(bearer.as_str())
            .map_err(|rejection| rejected("bearer", rejection))?;
        let refresh_claims = self
            .validator()
            .inspect(refresh_token.as_str())
            .map_err(|rejection| rejected("refresh token", rejection))?;

        if bearer_claims.subject() != refresh_claims.subject() {
            tracing::debug!("refresh token belongs to another subject");
            return Err(BAD_TOKEN);
        }

        if !lock(&self.inner.refresh_allowlist).remove(refresh_token.as_str()) {
            tracing::debug!(jti = refresh_claims.token_id(), "refresh token not allowed");
            return Err(BAD_TOKEN);
        }

        let pair = self.issue_for(
            bearer_claims.subject().as_str(),
            bearer_claims.username().as_str(),
        )?;
        tracing::info!(subject = %bearer_claims.subject(), "refresh token rotated");
        Ok(pair)
    }

    /// Whether `refresh_token` would still be honored
    pub fn is_allowed(&self, refresh_token: &RefreshTokenRef) -> bool {
        lock(&self.inner.refresh_allowlist).contains(refresh_token.as_str())
    }
}

fn rejected(what: &'static str, rejection: TokenRejection) -> ApiError {
    tracing::debug!(%rejection, "{what} rejected");
    ApiError::Unauthorized("bad token")
}
