use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::auth::{jwt, Identity};
use crate::error::ChatError;

/// Name of the cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "token";

/// Identity extracted from the `token` cookie or an `Authorization: Bearer` header.
/// Implements axum's FromRequestParts for use as an extractor.
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or(ChatError::InvalidToken)?;

        // Get JWT secret from request extensions (set by middleware layer)
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| ChatError::Internal("JWT secret not configured".to_string()))?;

        jwt::verify_session_token(&jwt_secret.0, &token)
    }
}

/// Find the session token in a request: cookie first, then bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_token(headers).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}

/// JWT secret stored in request extensions for the Identity extractor
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);
