use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,                      // generated row id
    pub username: String,             // unique login name
    #[serde(skip_serializing)]
    #[sqlx(rename = "password")]
    pub password_hash: String,        // Argon2 PHC string, never exposed
    #[sqlx(rename = "partyId")]
    pub party_id: String,             // the one party this admin moderates
    #[sqlx(rename = "sessionVersion")]
    pub session_version: i64,         // must match the token's `ver`
}
