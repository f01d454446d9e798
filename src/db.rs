use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::{
    auth::repo,
    config::SeedAdmin,
    error::AppError,
    storage::PartyId,
};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parse DATABASE_URL {database_url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    if let Some(parent) = options.clone().get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("create database directory")?;
        }
    }

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("connect to database")?;
    Ok(db)
}

pub async fn migrate(db: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

/// Create the configured admin account unless a user of that name exists.
pub async fn seed_admin(db: &SqlitePool, seed: &SeedAdmin) -> anyhow::Result<()> {
    let party = PartyId::parse(&seed.party_id)
        .map_err(|_| anyhow::anyhow!("SEED_ADMIN_PARTY is not a valid party name"))?;
    match repo::create_user(db, &seed.username, &seed.password, &party).await {
        Ok(user) => {
            info!(username = %user.username, party = %party, "seeded admin user");
            Ok(())
        }
        Err(AppError::DuplicateUsername) => {
            info!(username = %seed.username, "admin user already exists");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e).context("seed admin user")),
    }
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    // One long-lived connection: every new in-memory connection is a new database.
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    migrate(&db).await.expect("migrations apply");
    db
}
