use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::TOKEN_COOKIE;
use crate::auth::{credentials, jwt, Identity};
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// Build the `Set-Cookie` value for a session token.
/// `SameSite=None; Secure` lets the browser client on another origin send it.
fn session_cookie(token: &str, max_age_secs: u64) -> Result<HeaderValue, ChatError> {
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=None; Secure",
        TOKEN_COOKIE, token, max_age_secs
    ))
    .map_err(|e| ChatError::Internal(format!("Cookie header: {}", e)))
}

fn session_response(
    state: &AppState,
    status: StatusCode,
    identity: Identity,
) -> Result<Response, ChatError> {
    let token = jwt::issue_session_token(
        &state.jwt_secret,
        &identity.user_id,
        &identity.username,
        state.session_ttl_secs,
    )?;
    let cookie = session_cookie(&token, state.session_ttl_secs)?;

    let body = SessionResponse {
        id: identity.user_id,
        username: identity.username,
        token,
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// POST /register
/// Create a user, start a session. Body: { "username": "...", "password": "..." }
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Response, ChatError> {
    let db = state.db.clone();
    let identity = tokio::task::spawn_blocking(move || {
        credentials::create_user(&db, &req.username, &req.password)
    })
    .await??;

    session_response(&state, StatusCode::CREATED, identity)
}

/// POST /login
/// Verify credentials, start a session.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Response, ChatError> {
    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || {
        credentials::authenticate(&db, &req.username, &req.password)
    })
    .await?;

    let identity = match result {
        Ok(identity) => identity,
        Err(e) => {
            tracing::info!(error = %e, "Login rejected");
            return Err(e);
        }
    };

    tracing::info!(user_id = %identity.user_id, "User logged in");
    session_response(&state, StatusCode::OK, identity)
}

/// POST /logout
/// Clears the session cookie. Tokens are stateless, so nothing is revoked server-side.
pub async fn logout() -> Result<Response, ChatError> {
    let cookie = session_cookie("", 0)?;
    Ok(([(header::SET_COOKIE, cookie)], Json("ok")).into_response())
}

/// GET /profile
/// Returns the caller's identity.
pub async fn profile(identity: Identity) -> Json<Identity> {
    Json(identity)
}
