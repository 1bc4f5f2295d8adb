//! An authority reached over HTTP

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use reqwest::{header, Url};

use super::{dto, AuthorityError, TokenAuthority};
use crate::{AccessTokenRef, Credentials, RefreshTokenRef, TokenPair};

/// An authority exposing `POST /login` and `POST /refresh`
#[derive(Clone, Debug)]
pub struct HttpAuthority {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAuthority {
    /// Constructs a new HTTP authority rooted at `base_url`
    ///
    /// Endpoints are resolved relative to the base URL, so `http://host/api`
    /// and `http://host/api/` both resolve login to `http://host/api/login`.
    pub fn new(client: reqwest::Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self { client, base_url }
    }

    /// The base URL of the authority
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> Result<Url, AuthorityError> {
        self.base_url
            .join(name)
            .map_err(|err| AuthorityError::Unreachable(Box::new(err)))
    }
}

#[async_trait]
impl TokenAuthority for HttpAuthority {
    #[tracing::instrument(err, skip(self, credentials), fields(username = %credentials.username()))]
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, AuthorityError> {
        let req = self.client.post(self.endpoint("login")?).json(credentials);
        request_pair(req).await
    }

    #[tracing::instrument(err, skip_all, fields(has_bearer = bearer.is_some()))]
    async fn refresh(
        &self,
        bearer: Option<&AccessTokenRef>,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, AuthorityError> {
        let mut req = self
            .client
            .post(self.endpoint("refresh")?)
            .json(&dto::RefreshRequest { refresh_token });

        match bearer.map(bearer_header) {
            Some(Some(value)) => req = req.header(header::AUTHORIZATION, value),
            Some(None) => {
                tracing::warn!("access token is not a valid header value, not presenting it")
            }
            None => {}
        }

        request_pair(req).await
    }
}

fn bearer_header(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze()).ok()?;
    value.set_sensitive(true);
    Some(value)
}

async fn request_pair(req: reqwest::RequestBuilder) -> Result<TokenPair, AuthorityError> {
    tracing::trace!("requesting token pair from authority");

    let resp = req
        .send()
        .await
        .map_err(|err| AuthorityError::Unreachable(Box::new(err)))?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received response from issuing authority"
    );

    let body = resp
        .bytes()
        .await
        .map_err(|err| AuthorityError::Unreachable(Box::new(err)))?;

    if !status.is_success() {
        let message = match serde_json::from_slice::<dto::ErrorResponse>(&body) {
            Ok(err) => err.message,
            Err(_) => String::from_utf8_lossy(&body).into_owned(),
        };
        return Err(AuthorityError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;
    match (resp.access_token, resp.refresh_token) {
        (Some(access), Some(refresh)) => {
            tracing::info!("received new token pair");
            Ok(TokenPair::new(access, refresh))
        }
        _ => Err(AuthorityError::MissingTokens),
    }
}
