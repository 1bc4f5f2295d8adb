//! A token store backed by a shared cookie jar

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    cookie::{CookieStore, Jar},
    Url,
};

use super::TokenStore;
use crate::{StoreError, TokenPair};

const ACCESS_COOKIE: &str = "auth_token";
const REFRESH_COOKIE: &str = "refresh_token";

/// A token store that keeps the pair as `auth_token` and `refresh_token`
/// cookies scoped to an origin
///
/// The jar can be shared with a [`reqwest::Client`] so that the cookies are
/// sent alongside requests to that origin.
#[derive(Debug)]
pub struct CookieTokenStore {
    jar: Arc<Jar>,
    origin: Url,
}

impl CookieTokenStore {
    /// Constructs a cookie store for the given origin
    pub fn new(jar: Arc<Jar>, origin: Url) -> Self {
        Self { jar, origin }
    }

    /// The underlying cookie jar
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    fn put(&self, name: &str, value: &str) {
        self.jar
            .add_cookie_str(&format!("{name}={value}; Path=/"), &self.origin);
    }

    fn expire(&self, name: &str) {
        self.jar
            .add_cookie_str(&format!("{name}=; Path=/; Max-Age=0"), &self.origin);
    }
}

#[async_trait]
impl TokenStore for CookieTokenStore {
    async fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        let Some(header) = self.jar.cookies(&self.origin) else {
            return Ok(None);
        };
        let Ok(header) = header.to_str() else {
            return Ok(None);
        };

        let mut access = None;
        let mut refresh = None;
        for cookie in header.split(';') {
            match cookie.trim().split_once('=') {
                Some((ACCESS_COOKIE, value)) if !value.is_empty() => access = Some(value),
                Some((REFRESH_COOKIE, value)) if !value.is_empty() => refresh = Some(value),
                _ => {}
            }
        }

        Ok(access
            .zip(refresh)
            .map(|(access, refresh)| TokenPair::new(access, refresh)))
    }

    async fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.put(ACCESS_COOKIE, pair.access().as_str());
        self.put(REFRESH_COOKIE, pair.refresh().as_str());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.expire(ACCESS_COOKIE);
        self.expire(REFRESH_COOKIE);
        Ok(())
    }
}
