use axum::{extract::State, Json};

use crate::auth::{credentials, Identity};
use crate::error::ChatError;
use crate::state::AppState;

/// GET /people: every registered user as `{userId, username}`. Session required.
pub async fn list_people(
    State(state): State<AppState>,
    _identity: Identity,
) -> Result<Json<Vec<Identity>>, ChatError> {
    let db = state.db.clone();
    let people = tokio::task::spawn_blocking(move || credentials::list_users(&db)).await??;
    Ok(Json(people))
}
