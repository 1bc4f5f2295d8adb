use std::time::Duration;

use aliri::jwt;
use aliri_clock::{Clock, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    AccessToken, AccessTokenRef, Password, PasswordRef, RefreshToken, RefreshTokenRef, Username,
    UsernameRef,
};

/// An access token and the refresh token issued alongside it
///
/// The pair is always replaced as a unit. When persisted, the two halves are
/// stored under the `auth_token` and `refresh_token` keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "auth_token")]
    access: AccessToken,
    #[serde(rename = "refresh_token")]
    refresh: RefreshToken,
}

impl TokenPair {
    /// Constructs a new token pair
    pub fn new(access: impl Into<AccessToken>, refresh: impl Into<RefreshToken>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// Gets the access token
    #[inline]
    pub fn access(&self) -> &AccessTokenRef {
        &self.access
    }

    /// Gets the refresh token
    #[inline]
    pub fn refresh(&self) -> &RefreshTokenRef {
        &self.refresh
    }

    /// Splits the pair into its access and refresh tokens
    pub fn into_parts(self) -> (AccessToken, RefreshToken) {
        (self.access, self.refresh)
    }

    /// Whether this pair was issued with the given access token
    #[inline]
    pub fn carries(&self, access: &AccessTokenRef) -> bool {
        self.access.as_str() == access.as_str()
    }
}

/// A username and password presented at login or registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    username: Username,
    password: Password,
}

impl Credentials {
    /// Constructs a new set of credentials
    pub fn new(username: impl Into<Username>, password: impl Into<Password>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The username
    pub fn username(&self) -> &UsernameRef {
        &self.username
    }

    /// The password
    pub fn password(&self) -> &PasswordRef {
        &self.password
    }
}

/// Claims carried by both halves of a token pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    sub: jwt::Subject,
    username: Username,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<UnixTime>,
    exp: UnixTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "jwt::Audiences::is_empty")]
    aud: jwt::Audiences,
}

impl SessionClaims {
    /// Claims for `subject` valid from `issued` for `ttl`
    ///
    /// Every set of claims gets a fresh random `jti`, so that two tokens minted
    /// for the same user within the same second are still distinct.
    pub fn new(
        subject: impl Into<jwt::Subject>,
        username: impl Into<Username>,
        issued: UnixTime,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: subject.into(),
            username: username.into(),
            iat: Some(issued),
            exp: UnixTime(issued.0.saturating_add(ttl.as_secs())),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            aud: jwt::Audiences::empty(),
        }
    }

    /// Overrides the expiry claim
    pub fn with_expiration(mut self, exp: UnixTime) -> Self {
        self.exp = exp;
        self
    }

    /// The subject the token was issued to
    pub fn subject(&self) -> &jwt::SubjectRef {
        &self.sub
    }

    /// The name of the user the token was issued to
    pub fn username(&self) -> &UsernameRef {
        &self.username
    }

    /// When the token was issued, if the issuer recorded it
    pub fn issued(&self) -> Option<UnixTime> {
        self.iat
    }

    /// When the token expires
    pub fn expiry(&self) -> UnixTime {
        self.exp
    }

    /// The unique token identifier, if any
    pub fn token_id(&self) -> Option<&str> {
        self.jti.as_deref()
    }

    /// The total validity window, if the issue time is known
    pub fn lifetime(&self) -> Option<Duration> {
        self.iat
            .map(|iat| Duration::from_secs(self.exp.0.saturating_sub(iat.0)))
    }

    /// Time remaining until expiry as of `now`
    pub fn until_expired_at(&self, now: UnixTime) -> Duration {
        Duration::from_secs(self.exp.0.saturating_sub(now.0))
    }
}

impl jwt::CoreClaims for SessionClaims {
    fn nbf(&self) -> Option<UnixTime> {
        None
    }

    fn exp(&self) -> Option<UnixTime> {
        Some(self.exp)
    }

    fn aud(&self) -> &jwt::Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&jwt::IssuerRef> {
        None
    }

    fn sub(&self) -> Option<&jwt::SubjectRef> {
        Some(&self.sub)
    }
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be renewed
    Stale,
    /// The token is no longer valid
    Expired,
}

/// Determines how early before expiry an access token should be renewed
#[derive(Clone, Debug)]
pub struct RenewalSchedule<C = System> {
    freshness: f64,
    min_lead: Duration,
    clock: C,
}

impl Default for RenewalSchedule {
    /// Default schedule
    ///
    /// A token is fresh for the first 75% of its lifetime, and is always
    /// considered stale with at least 30 seconds remaining.
    fn default() -> Self {
        Self {
            freshness: 0.75,
            min_lead: Duration::from_secs(30),
            clock: System,
        }
    }
}

impl RenewalSchedule {
    /// Constructs a new schedule
    ///
    /// `freshness` is the fraction of a token's lifetime during which it is
    /// considered fresh. Regardless of that fraction, renewal starts no later
    /// than `min_lead` before expiry.
    pub fn new(freshness: f64, min_lead: Duration) -> Self {
        Self {
            freshness: freshness.clamp(0.0, 1.0),
            min_lead,
            clock: System,
        }
    }
}

impl<C> RenewalSchedule<C> {
    /// Uses a custom clock
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> RenewalSchedule<D> {
        RenewalSchedule {
            freshness: self.freshness,
            min_lead: self.min_lead,
            clock,
        }
    }

    /// The instant at which a token with these claims becomes stale
    pub fn stale_at(&self, claims: &SessionClaims) -> UnixTime {
        let exp = claims.expiry();
        let lead = match claims.lifetime() {
            Some(lifetime) => lifetime.mul_f64(1.0 - self.freshness).max(self.min_lead),
            None => self.min_lead,
        };
        UnixTime(exp.0.saturating_sub(lead.as_secs()))
    }

    /// A token's lifecycle status as of the provided time
    pub fn status_at(&self, claims: &SessionClaims, now: UnixTime) -> TokenStatus {
        if now < self.stale_at(claims) {
            TokenStatus::Fresh
        } else if now <= claims.expiry() {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }
}

impl<C: Clock> RenewalSchedule<C> {
    /// The current time according to this schedule's clock
    #[inline]
    pub fn now(&self) -> UnixTime {
        self.clock.now()
    }

    /// A token's current lifecycle status
    #[inline]
    pub fn status(&self, claims: &SessionClaims) -> TokenStatus {
        self.status_at(claims, self.clock.now())
    }
}
