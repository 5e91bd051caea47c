//! Session Store: signed identity tokens bound to {user_id, username}.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::error::ChatError;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User ID (UUIDv7)
    pub sub: String,
    pub username: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Identity {
            user_id: claims.sub,
            username: claims.username,
        }
    }
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue a session token for a user.
pub fn issue_session_token(
    secret: &[u8],
    user_id: &str,
    username: &str,
    ttl_secs: u64,
) -> Result<String, ChatError> {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        username: username.to_string(),
        iat: now,
        exp: now + ttl_secs as i64,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| ChatError::Internal(format!("Token encoding: {}", e)))
}

/// Verify a session token and resolve it to the identity it was issued for.
pub fn verify_session_token(secret: &[u8], token: &str) -> Result<Identity, ChatError> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims.into())
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ChatError::TokenExpired,
            _ => ChatError::InvalidToken,
        })
}
