use sqlx::SqlitePool;

use super::repo_types::{Photo, PhotoStatus};
use crate::error::{AppError, AppResult};
use crate::storage::PartyId;

/// Register a stored file. Returns the new row id.
pub async fn insert(
    db: &SqlitePool,
    file_name: &str,
    status: PhotoStatus,
    party: &PartyId,
) -> AppResult<i64> {
    let done = sqlx::query(
        r#"
        INSERT INTO photos (fileName, status, partyId)
        VALUES (?1, ?2, ?3)
        "#,
    )
    .bind(file_name)
    .bind(status)
    .bind(party.as_str())
    .execute(db)
    .await?;

    Ok(done.last_insert_rowid())
}

// ---- Queries ----

/// All photos of a party in insertion order, optionally only accepted ones.
pub async fn list_by_party(
    db: &SqlitePool,
    party: &PartyId,
    accepted_only: bool,
) -> AppResult<Vec<Photo>> {
    let rows = if accepted_only {
        sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, fileName, status, partyId
              FROM photos
             WHERE partyId = ?1 AND status = ?2
             ORDER BY id ASC
            "#,
        )
        .bind(party.as_str())
        .bind(PhotoStatus::Accepted)
        .fetch_all(db)
        .await?
    } else {
        sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, fileName, status, partyId
              FROM photos
             WHERE partyId = ?1
             ORDER BY id ASC
            "#,
        )
        .bind(party.as_str())
        .fetch_all(db)
        .await?
    };

    Ok(rows)
}

pub async fn find(db: &SqlitePool, file_name: &str, party: &PartyId) -> AppResult<Option<Photo>> {
    let row = sqlx::query_as::<_, Photo>(
        r#"
        SELECT id, fileName, status, partyId
          FROM photos
         WHERE fileName = ?1 AND partyId = ?2
         LIMIT 1
        "#,
    )
    .bind(file_name)
    .bind(party.as_str())
    .fetch_optional(db)
    .await?;

    Ok(row)
}

// ---- Mutations ----

/// Scoped by party as well as name, so a guessed name from another party
/// matches nothing. Setting the current status again still counts as a match.
pub async fn update_status(
    db: &SqlitePool,
    file_name: &str,
    party: &PartyId,
    status: PhotoStatus,
) -> AppResult<()> {
    let done = sqlx::query(
        r#"
        UPDATE photos
           SET status = ?1
         WHERE fileName = ?2 AND partyId = ?3
        "#,
    )
    .bind(status)
    .bind(file_name)
    .bind(party.as_str())
    .execute(db)
    .await?;

    if done.rows_affected() == 0 {
        return Err(AppError::NotFound("Photo"));
    }
    Ok(())
}

pub async fn delete_by_file_name(db: &SqlitePool, file_name: &str, party: &PartyId) -> AppResult<()> {
    let done = sqlx::query(r#"DELETE FROM photos WHERE fileName = ?1 AND partyId = ?2"#)
        .bind(file_name)
        .bind(party.as_str())
        .execute(db)
        .await?;

    if done.rows_affected() == 0 {
        return Err(AppError::NotFound("Photo"));
    }
    Ok(())
}
