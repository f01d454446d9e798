use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

const NAME_COLLISION_RETRIES: usize = 4;

/// Validated party identifier. Always a single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartyId(String);

impl PartyId {
    pub fn parse(raw: &str) -> AppResult<Self> {
        lazy_static! {
            static ref PARTY_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").unwrap();
        }
        if PARTY_RE.is_match(raw) && !raw.contains("..") {
            Ok(Self(raw.to_string()))
        } else {
            Err(AppError::InvalidParty)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps parties onto `photos/<party>` and `thumbnails/<party>` subtrees.
#[derive(Debug, Clone)]
pub struct PartyFileStore {
    photos_root: PathBuf,
    thumbnails_root: PathBuf,
}

impl PartyFileStore {
    pub fn new(photos_root: impl Into<PathBuf>, thumbnails_root: impl Into<PathBuf>) -> Self {
        Self {
            photos_root: photos_root.into(),
            thumbnails_root: thumbnails_root.into(),
        }
    }

    /// Ensure both party directories exist and return the originals directory.
    pub async fn resolve_upload_destination(&self, party: &PartyId) -> AppResult<PathBuf> {
        let photos = self.photos_root.join(party.as_str());
        let thumbs = self.thumbnails_root.join(party.as_str());
        fs::create_dir_all(&photos).await?;
        fs::create_dir_all(&thumbs).await?;
        Ok(photos)
    }

    pub fn photo_path(&self, party: &PartyId, stored_name: &str) -> AppResult<PathBuf> {
        validate_stored_name(stored_name)?;
        Ok(self.photos_root.join(party.as_str()).join(stored_name))
    }

    pub fn thumbnail_path(&self, party: &PartyId, stored_name: &str) -> AppResult<PathBuf> {
        validate_stored_name(stored_name)?;
        Ok(self.thumbnails_root.join(party.as_str()).join(stored_name))
    }

    /// Create a fresh file for an upload. Opening with `create_new` means an
    /// existing upload is never overwritten; on a clash the name gets a
    /// random suffix and the open is retried.
    pub async fn create_stored_file(
        &self,
        party: &PartyId,
        original_name: &str,
    ) -> AppResult<(String, PathBuf, fs::File)> {
        let dir = self.resolve_upload_destination(party).await?;
        let mut stored_name = generate_stored_name(original_name);

        for _ in 0..NAME_COLLISION_RETRIES {
            let path = dir.join(&stored_name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(%party, stored_name = %stored_name, "created upload file");
                    return Ok((stored_name, path, file));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(%party, stored_name = %stored_name, "stored name collision, retrying");
                    stored_name = with_random_suffix(&stored_name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Storage(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("could not allocate a unique name for {original_name}"),
        )))
    }

    pub async fn open(&self, path: &Path) -> AppResult<fs::File> {
        match fs::File::open(path).await {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound("Photo")),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, path: &Path) -> AppResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound("File")),
            Err(e) => Err(e.into()),
        }
    }
}

/// `<unix micros>_<sanitized original name>`.
pub fn generate_stored_name(original_name: &str) -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default();
    format!("{}_{}", micros, sanitize_file_name(original_name))
}

/// Keep only the final path component, with anything outside
/// `[A-Za-z0-9._-]` replaced by `_`.
pub fn sanitize_file_name(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "photo".to_string()
    } else {
        cleaned.to_string()
    }
}

fn with_random_suffix(stored_name: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    match stored_name.split_once('_') {
        Some((stamp, rest)) => format!("{stamp}-{suffix:06x}_{rest}"),
        None => format!("{stored_name}-{suffix:06x}"),
    }
}

pub fn validate_stored_name(name: &str) -> AppResult<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        Err(AppError::InvalidFileName)
    } else {
        Ok(())
    }
}
