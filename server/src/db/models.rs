/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// User record in the users table
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    /// Argon2id PHC string
    pub password_hash: String,
    pub created_at: String,
}

/// Chat message record in the messages table
#[derive(Debug, Clone)]
pub struct MessageRow {
    /// Insertion sequence, defines chronological order
    pub seq: i64,
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub text: Option<String>,
    pub attachment_ref: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    /// Column list matching `from_row`.
    pub const COLUMNS: &'static str =
        "seq, id, sender, recipient, text, attachment_ref, created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            sender: row.get(2)?,
            recipient: row.get(3)?,
            text: row.get(4)?,
            attachment_ref: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
