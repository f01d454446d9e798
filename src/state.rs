use crate::config::AppConfig;
use crate::db;
use crate::storage::PartyFileStore;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub files: Arc<PartyFileStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = db::connect(&config.database_url).await?;
        db::migrate(&db).await?;
        if let Some(seed) = &config.seed_admin {
            db::seed_admin(&db, seed).await?;
        }

        let files = Arc::new(PartyFileStore::new(
            &config.photos_dir,
            &config.thumbnails_dir,
        ));

        Ok(Self::from_parts(db, config, files))
    }

    pub fn from_parts(db: SqlitePool, config: Arc<AppConfig>, files: Arc<PartyFileStore>) -> Self {
        Self { db, config, files }
    }

    /// In-memory database plus a file store rooted at `root`.
    #[cfg(test)]
    pub async fn fake(root: &std::path::Path) -> Self {
        use crate::config::{SessionConfig, UploadConfig};

        let db = db::memory_pool().await;
        let config = Arc::new(AppConfig {
            database_url: "sqlite::memory:".into(),
            photos_dir: root.join("photos"),
            thumbnails_dir: root.join("thumbnails"),
            session: SessionConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                secure_cookie: false,
            },
            upload: UploadConfig::default(),
            seed_admin: None,
        });
        let files = Arc::new(PartyFileStore::new(
            &config.photos_dir,
            &config.thumbnails_dir,
        ));
        Self::from_parts(db, config, files)
    }
}
