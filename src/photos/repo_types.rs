use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// Moderation status. Uploads start out accepted; there is no pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PhotoStatus {
    Accepted,
    Rejected,
}

impl PhotoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoStatus::Accepted => "accepted",
            PhotoStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "accepted" => Ok(PhotoStatus::Accepted),
            "rejected" => Ok(PhotoStatus::Rejected),
            _ => Err(AppError::Validation(
                "status must be either accepted or rejected".into(),
            )),
        }
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Photo row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Photo {
    pub id: i64,
    #[sqlx(rename = "fileName")]
    pub file_name: String, // stored name on disk
    pub status: PhotoStatus,
    #[sqlx(rename = "partyId")]
    pub party_id: String,
}
