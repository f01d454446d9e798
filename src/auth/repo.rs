use crate::auth::password::{hash_password, is_legacy_hash, verify_password};
use crate::auth::repo_types::User;
use crate::error::{AppError, AppResult};
use crate::storage::PartyId;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Find a user by username.
pub async fn find_by_username(db: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, partyId, sessionVersion
        FROM users
        WHERE username = ?1
        "#,
    )
    .bind(username)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn find_by_id(db: &SqlitePool, id: i64) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"SELECT id, username, password, partyId, sessionVersion FROM users WHERE id = ?1"#,
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(user)
}

pub async fn count_by_party(db: &SqlitePool, party: &PartyId) -> AppResult<i64> {
    let (n,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM users WHERE partyId = ?1"#)
        .bind(party.as_str())
        .fetch_one(db)
        .await?;
    Ok(n)
}

/// Hash the password and insert the user. A taken username surfaces as
/// `DuplicateUsername` straight from the UNIQUE constraint.
pub async fn create_user(
    db: &SqlitePool,
    username: &str,
    plain_password: &str,
    party: &PartyId,
) -> AppResult<User> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username must not be empty.".into()));
    }
    if plain_password.is_empty() {
        return Err(AppError::Validation("Password must not be empty.".into()));
    }

    let hash = hash_password(plain_password).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, password, partyId)
        VALUES (?1, ?2, ?3)
        "#,
    )
    .bind(username)
    .bind(&hash)
    .bind(party.as_str())
    .execute(db)
    .await;

    match result {
        Ok(done) => Ok(User {
            id: done.last_insert_rowid(),
            username: username.to_string(),
            password_hash: hash,
            party_id: party.as_str().to_string(),
            session_version: 0,
        }),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            warn!(%username, "username already registered");
            Err(AppError::DuplicateUsername)
        }
        Err(e) => Err(e.into()),
    }
}

/// Replace the stored hash after re-checking the current password. Every
/// session issued before the change stops working; the updated row is
/// returned so the caller can sign a fresh one.
pub async fn change_password(
    db: &SqlitePool,
    username: &str,
    old_plain: &str,
    new_plain: &str,
) -> AppResult<User> {
    let user = find_by_username(db, username)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    if !verify_password(old_plain, &user.password_hash).await? {
        warn!(%username, "password change with incorrect current password");
        return Err(AppError::IncorrectOldPassword);
    }
    if new_plain.is_empty() {
        return Err(AppError::Validation("Password must not be empty.".into()));
    }

    let hash = hash_password(new_plain).await?;
    let done = sqlx::query(
        r#"UPDATE users SET password = ?1, sessionVersion = sessionVersion + 1 WHERE id = ?2"#,
    )
    .bind(&hash)
    .bind(user.id)
    .execute(db)
    .await?;
    if done.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }

    info!(user_id = user.id, %username, "password changed");
    find_by_id(db, user.id).await?.ok_or(AppError::NotFound("User"))
}

/// Invalidate every session token issued to the user so far.
pub async fn revoke_sessions(db: &SqlitePool, user_id: i64) -> AppResult<()> {
    sqlx::query(r#"UPDATE users SET sessionVersion = sessionVersion + 1 WHERE id = ?1"#)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Look the user up and check the password. `None` for unknown users and
/// wrong passwords alike. A bcrypt hash carried over from the old
/// deployment is replaced by an argon2 one once the password checks out.
pub async fn authenticate(db: &SqlitePool, username: &str, plain: &str) -> AppResult<Option<User>> {
    let Some(mut user) = find_by_username(db, username).await? else {
        warn!(%username, "login unknown username");
        return Ok(None);
    };
    if !verify_password(plain, &user.password_hash).await? {
        warn!(%username, user_id = user.id, "login invalid password");
        return Ok(None);
    }

    if is_legacy_hash(&user.password_hash) {
        let hash = hash_password(plain).await?;
        match sqlx::query(r#"UPDATE users SET password = ?1 WHERE id = ?2"#)
            .bind(&hash)
            .bind(user.id)
            .execute(db)
            .await
        {
            Ok(_) => {
                info!(user_id = user.id, "legacy bcrypt hash upgraded to argon2");
                user.password_hash = hash;
            }
            Err(e) => warn!(error = %e, user_id = user.id, "legacy hash not upgraded"),
        }
    }
    Ok(Some(user))
}
