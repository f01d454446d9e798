use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_file_bytes: u64,
    pub max_files: usize,
    /// Exact MIME types accepted. `None` accepts any `image/*` type.
    pub allowed_types: Option<Vec<String>>,
    /// Refuse uploads addressed to a party that has no registered user.
    pub known_parties_only: bool,
    pub thumbnail_max_dim: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedAdmin {
    pub username: String,
    pub password: String,
    pub party_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub photos_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub session: SessionConfig,
    pub upload: UploadConfig,
    pub seed_admin: Option<SeedAdmin>,
}

pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 50;

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
            allowed_types: None,
            known_parties_only: true,
            thumbnail_max_dim: 256,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://database/database.sqlite".into());

        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET").context("SESSION_SECRET must be set")?,
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "party-photos".into()),
            audience: std::env::var("SESSION_AUDIENCE")
                .unwrap_or_else(|_| "party-photos-admin".into()),
            ttl_minutes: env_parse("SESSION_TTL_MINUTES").unwrap_or(60 * 12),
            secure_cookie: env_parse("SESSION_COOKIE_SECURE").unwrap_or(false),
        };

        let defaults = UploadConfig::default();
        let upload = UploadConfig {
            max_file_bytes: env_parse("UPLOAD_MAX_FILE_BYTES").unwrap_or(defaults.max_file_bytes),
            max_files: env_parse("UPLOAD_MAX_FILES").unwrap_or(defaults.max_files),
            allowed_types: std::env::var("UPLOAD_ALLOWED_TYPES")
                .ok()
                .map(|v| parse_type_list(&v))
                .filter(|types| !types.is_empty()),
            known_parties_only: env_parse("UPLOAD_KNOWN_PARTIES_ONLY")
                .unwrap_or(defaults.known_parties_only),
            thumbnail_max_dim: env_parse("THUMBNAIL_MAX_DIM").unwrap_or(defaults.thumbnail_max_dim),
        };

        let seed_admin = std::env::var("SEED_ADMIN_PASSWORD").ok().map(|password| SeedAdmin {
            username: std::env::var("SEED_ADMIN_USERNAME").unwrap_or_else(|_| "admin".into()),
            password,
            party_id: std::env::var("SEED_ADMIN_PARTY").unwrap_or_else(|_| "myParty".into()),
        });

        Ok(Self {
            database_url,
            photos_dir: std::env::var("PHOTOS_DIR")
                .unwrap_or_else(|_| "photos".into())
                .into(),
            thumbnails_dir: std::env::var("THUMBNAILS_DIR")
                .unwrap_or_else(|_| "thumbnails".into())
                .into(),
            session,
            upload,
            seed_admin,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_type_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
