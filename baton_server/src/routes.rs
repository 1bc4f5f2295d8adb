use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use baton_tokens::{
    authority::dto::TokenResponse, AccessTokenRef, Password, RefreshToken, SessionClaims,
    TokenPair, Username,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{state::User, ApiError, AppState};

/// The routes of the authority
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsBody {
    #[serde(default)]
    username: Option<Username>,
    #[serde(default)]
    password: Option<Password>,
}

impl CredentialsBody {
    /// Both fields, if both are present and non-empty
    fn into_parts(self) -> Option<(Username, Password)> {
        let username = self.username.filter(|u| !u.as_str().is_empty())?;
        let password = self.password.filter(|p| !p.as_str().is_empty())?;
        Some((username, password))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RefreshBody {
    #[serde(default, rename = "refreshToken")]
    refresh_token: Option<RefreshToken>,
}

#[derive(Debug, Serialize)]
struct Created {
    message: String,
    content: User,
}

#[derive(Debug, Serialize)]
struct Me {
    content: SessionClaims,
}

/// A missing or unreadable body is treated like an empty one, so that the
/// caller gets the same message as for missing fields
fn body_or_default<T: Default>(body: Result<Json<T>, JsonRejection>) -> T {
    match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::debug!(%rejection, "unreadable request body");
            T::default()
        }
    }
}

/// Extracts the token from an `Authorization: Bearer …` header
///
/// The scheme is matched without regard to case.
fn bearer(headers: &HeaderMap) -> Option<&AccessTokenRef> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    let token = token.trim();

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(AccessTokenRef::from_str(token))
    } else {
        None
    }
}

fn token_response(pair: TokenPair) -> Json<TokenResponse> {
    let (access, refresh) = pair.into_parts();
    Json(TokenResponse {
        access_token: Some(access),
        refresh_token: Some(refresh),
    })
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let (username, password) = body_or_default(body).into_parts().ok_or_else(|| {
        ApiError::BadRequest("enter the correct username and password".into())
    })?;

    let user = state
        .authenticate(&username, &password)
        .ok_or_else(|| ApiError::BadRequest("wrong login or password".into()))?;

    let pair = state.issue(&user)?;
    tracing::info!(id = user.id, username = %username, "user logged in");
    Ok(token_response(pair))
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let (username, password) = body_or_default(body)
        .into_parts()
        .ok_or_else(|| ApiError::BadRequest("please enter username and password".into()))?;

    let user = state.register(&username, &password)?;
    let created = Created {
        message: format!("user {} created", user.id),
        content: user,
    };
    Ok((StatusCode::CREATED, Json(created)))
}

async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RefreshBody>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let refresh_token = body_or_default(body)
        .refresh_token
        .filter(|t| !t.as_str().is_empty())
        .ok_or_else(|| ApiError::BadRequest("need a refresh token".into()))?;
    let bearer = bearer(&headers).ok_or(ApiError::Unauthorized("need a access token"))?;

    let pair = state.rotate(bearer, &refresh_token)?;
    Ok(token_response(pair))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Me>, ApiError> {
    let bearer = bearer(&headers).ok_or(ApiError::Unauthorized("need a token"))?;
    let claims = state.validator().inspect(bearer.as_str()).map_err(|rejection| {
        tracing::debug!(%rejection, "bearer rejected");
        ApiError::Unauthorized("bad token")
    })?;

    Ok(Json(Me { content: claims }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
