//! Credential store: user registration and password authentication.
//!
//! Passwords are stored as Argon2id PHC strings. Functions are synchronous
//! and expect to run inside `spawn_blocking`.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::models::UserRow;
use crate::db::DbPool;
use crate::error::ChatError;

/// Maximum username length in characters.
const MAX_USERNAME_LEN: usize = 32;

/// Returned for both unknown users and wrong passwords.
const BAD_CREDENTIALS: &str = "Invalid username or password";

pub fn hash_password(password: &str) -> Result<String, ChatError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ChatError::Internal(format!("Password hashing: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn validate_credentials(username: &str, password: &str) -> Result<(), ChatError> {
    if username.is_empty() {
        return Err(ChatError::Validation("Username cannot be empty".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ChatError::Validation(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if password.is_empty() {
        return Err(ChatError::Validation("Password cannot be empty".to_string()));
    }
    Ok(())
}

/// Create a user and return its identity.
pub fn create_user(db: &DbPool, username: &str, password: &str) -> Result<Identity, ChatError> {
    let username = username.trim();
    validate_credentials(username, password)?;

    let password_hash = hash_password(password)?;
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();

    let conn = db
        .lock()
        .map_err(|e| ChatError::Internal(format!("DB lock: {}", e)))?;

    let taken = conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        [username],
        |row| row.get::<_, String>(0),
    );
    match taken {
        Ok(_) => return Err(ChatError::Conflict("Username already taken".to_string())),
        Err(rusqlite::Error::QueryReturnedNoRows) => {}
        Err(e) => return Err(e.into()),
    }

    conn.execute(
        "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, username, password_hash, now],
    )?;

    tracing::info!(user_id = %id, username = %username, "User registered");

    Ok(Identity::new(id, username))
}

/// Check a username/password pair.
pub fn authenticate(db: &DbPool, username: &str, password: &str) -> Result<Identity, ChatError> {
    let user = find_user_by_name(db, username.trim())?
        .ok_or_else(|| ChatError::Authentication(BAD_CREDENTIALS.to_string()))?;

    if !verify_password(password, &user.password_hash) {
        return Err(ChatError::Authentication(BAD_CREDENTIALS.to_string()));
    }

    Ok(Identity::new(user.id, user.username))
}

pub fn find_user_by_name(db: &DbPool, username: &str) -> Result<Option<UserRow>, ChatError> {
    let conn = db
        .lock()
        .map_err(|e| ChatError::Internal(format!("DB lock: {}", e)))?;

    let result = conn.query_row(
        "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
        [username],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    );

    match result {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every registered user, ordered by username.
pub fn list_users(db: &DbPool) -> Result<Vec<Identity>, ChatError> {
    let conn = db
        .lock()
        .map_err(|e| ChatError::Internal(format!("DB lock: {}", e)))?;

    let mut stmt = conn.prepare("SELECT id, username FROM users ORDER BY username ASC")?;
    let users = stmt
        .query_map([], |row| Ok(Identity::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
