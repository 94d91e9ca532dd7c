//! Session cookie handling, the `CurrentUser` extractor and the account
//! endpoints.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;

use super::error::ApiError;
use super::validation::validate_signup;
use crate::db::{InvitePreview, LoginRequest, LoginResponse, SignupRequest, User, UserResponse};
use crate::error::Error;
use crate::services::{accounts, organizations};
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Session token from the `session` cookie, falling back to a bearer token
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookie_token(headers) {
        return Some(token);
    }

    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let max_age = time::Duration::seconds(state.sessions.ttl().num_seconds());
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.auth.secure_cookies)
        .max_age(max_age)
        .build()
}

fn expired_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.auth.secure_cookies)
        .max_age(time::Duration::ZERO)
        .build()
}

/// The signed-in user; rejects with 401 when the session is missing or invalid
pub struct CurrentUser(pub User);

/// The signed-in user when there is one
pub struct MaybeUser(pub Option<User>);

/// Outcome of session validation done by [`refresh_session`], reused by the
/// extractors so a request validates its session once
#[derive(Clone)]
struct ResolvedUser(Option<User>);

async fn resolve_user(parts: &Parts, state: &AppState) -> Result<Option<User>, ApiError> {
    if let Some(ResolvedUser(user)) = parts.extensions.get::<ResolvedUser>() {
        return Ok(user.clone());
    }
    let Some(token) = extract_token(&parts.headers) else {
        return Ok(None);
    };
    let session = state.sessions.validate(&token).await?;
    Ok(session.map(|s| s.user))
}

fn sets_session_cookie(response: &Response) -> bool {
    let prefix = format!("{}=", SESSION_COOKIE);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .any(|v| v.as_bytes().starts_with(prefix.as_bytes()))
}

/// Validate the session once per request and reissue the cookie when the
/// sliding window moved, so the browser's `Max-Age` tracks the stored expiry.
pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let mut renewed_token = None;
    if let Some(token) = extract_token(request.headers()) {
        match state.sessions.validate(&token).await {
            Ok(session) => {
                let from_cookie = cookie_token(request.headers()).as_deref() == Some(token.as_str());
                if from_cookie && session.as_ref().is_some_and(|s| s.renewed) {
                    renewed_token = Some(token);
                }
                request
                    .extensions_mut()
                    .insert(ResolvedUser(session.map(|s| s.user)));
            }
            // Left to the extractor, which retries and reports the failure
            Err(e) => tracing::warn!("Session validation failed: {}", e),
        }
    }

    let mut response = next.run(request).await;

    // Login, signup and logout set the cookie themselves
    if let Some(token) = renewed_token.filter(|_| !sets_session_cookie(&response)) {
        match HeaderValue::from_str(&session_cookie(&state, token).to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!("Could not encode renewed session cookie: {}", e),
        }
    }
    response
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        resolve_user(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or_else(|| Error::Unauthorized.into())
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_user(parts, state).await?))
    }
}

fn signed_in_response(state: &AppState, jar: CookieJar, signed_in: accounts::SignedIn) -> (CookieJar, Json<LoginResponse>) {
    let jar = jar.add(session_cookie(state, signed_in.token.clone()));
    (
        jar,
        Json(LoginResponse {
            token: signed_in.token,
            user: UserResponse::from(signed_in.user),
            expires_at: signed_in.session.expires_at,
        }),
    )
}

/// Create an account, with or without an invite code
pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<SignupRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    validate_signup(&request)?;
    let signed_in = accounts::signup(&state, request).await?;
    Ok(signed_in_response(&state, jar, signed_in))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let signed_in = accounts::login(&state, &request.email, &request.password)
        .await
        .map_err(|e| match e {
            Error::Unauthorized => ApiError::unauthorized("Invalid email or password"),
            other => other.into(),
        })?;
    Ok(signed_in_response(&state, jar, signed_in))
}

/// Revoke the presented session and clear the cookie. Succeeds without one.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if let Some(token) = extract_token(&headers) {
        accounts::logout(&state, &token).await?;
    }
    let jar = jar.add(expired_cookie(&state));
    Ok((jar, Json(serde_json::json!({ "message": "Logged out" }))))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

/// Invite details for the signup form
pub async fn invite_preview(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<InvitePreview>, ApiError> {
    Ok(Json(organizations::preview_invite(&state, &code).await?))
}
