use std::{fmt::Display, path::Path};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{info, instrument, warn};

use super::{
    repo,
    repo_types::{Photo, PhotoStatus},
    thumbnails,
};
use crate::{
    auth::repo as users,
    config::UploadConfig,
    error::{AppError, AppResult},
    state::AppState,
    storage::PartyId,
};

/// Metadata of one file in an upload request.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub original_name: String,
    pub content_type: Option<String>,
}

/// Resolve the untrusted `partyname` of a public upload into a party that
/// may receive photos.
pub async fn admit_party(st: &AppState, raw: Option<&str>) -> AppResult<PartyId> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(AppError::MissingParty)?;
    let party = PartyId::parse(raw)?;

    if st.config.upload.known_parties_only && users::count_by_party(&st.db, &party).await? == 0 {
        warn!(%party, "upload for a party without users refused");
        return Err(AppError::NotFound("Party"));
    }
    Ok(party)
}

pub fn is_allowed_type(content_type: Option<&str>, policy: &UploadConfig) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    // drop parameters such as "; charset=..."
    let ct = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match &policy.allowed_types {
        Some(allowed) => allowed.iter().any(|a| *a == ct),
        None => ct.starts_with("image/") && ct.len() > "image/".len(),
    }
}

/// Store one uploaded file and register it as accepted.
///
/// The type is checked before anything touches the disk, the size while the
/// body streams in. A file that fails either way, or whose row cannot be
/// inserted, is removed again; files stored earlier in the same request stay.
#[instrument(skip(st, body), fields(party = %party, original = %file.original_name))]
pub async fn ingest_file<S, E>(
    st: &AppState,
    party: &PartyId,
    file: IncomingFile,
    body: S,
) -> AppResult<Photo>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let policy = &st.config.upload;
    if !is_allowed_type(file.content_type.as_deref(), policy) {
        warn!(content_type = ?file.content_type, "rejected non-image upload");
        return Err(AppError::UnsupportedType);
    }

    let (stored_name, path, mut out) = st.files.create_stored_file(party, &file.original_name).await?;

    let body = std::pin::pin!(body);
    let written = match copy_limited(body, &mut out, policy.max_file_bytes).await {
        Ok(n) => n,
        Err(e) => {
            drop(out);
            discard(st, &path).await;
            return Err(e);
        }
    };
    drop(out);

    let id = match repo::insert(&st.db, &stored_name, PhotoStatus::Accepted, party).await {
        Ok(id) => id,
        Err(e) => {
            discard(st, &path).await;
            return Err(e);
        }
    };

    let thumb = st.files.thumbnail_path(party, &stored_name)?;
    thumbnails::generate_best_effort(path, thumb, policy.thumbnail_max_dim).await;

    info!(photo_id = id, stored_name = %stored_name, bytes = written, "photo stored");
    Ok(Photo {
        id,
        file_name: stored_name,
        status: PhotoStatus::Accepted,
        party_id: party.as_str().to_string(),
    })
}

async fn copy_limited<S, E>(
    mut body: std::pin::Pin<&mut S>,
    out: &mut File,
    limit: u64,
) -> AppResult<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut total: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| AppError::Validation(format!("Upload interrupted: {e}")))?;
        total += chunk.len() as u64;
        if total > limit {
            warn!(limit, "upload exceeds size limit");
            return Err(AppError::PayloadTooLarge { limit });
        }
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok(total)
}

async fn discard(st: &AppState, path: &Path) {
    if let Err(e) = st.files.delete(path).await {
        warn!(error = %e, path = %path.display(), "could not remove partial upload");
    }
}

/// Only registered photos are served; a stray file in the party directory is not.
pub async fn ensure_registered(st: &AppState, party: &PartyId, file_name: &str) -> AppResult<()> {
    repo::find(&st.db, file_name, party)
        .await?
        .map(|_| ())
        .ok_or(AppError::NotFound("Photo"))
}

pub async fn list(st: &AppState, party: &PartyId, accepted_only: bool) -> AppResult<Vec<Photo>> {
    repo::list_by_party(&st.db, party, accepted_only).await
}

#[instrument(skip(st), fields(party = %party))]
pub async fn change_status(
    st: &AppState,
    party: &PartyId,
    file_name: &str,
    status: PhotoStatus,
) -> AppResult<()> {
    repo::update_status(&st.db, file_name, party, status).await?;
    info!(%file_name, %status, "photo status changed");
    Ok(())
}

/// Remove the row, then the original and its thumbnail. Row first means a
/// failure part-way leaves at worst an unreferenced file, never a row
/// pointing at nothing.
#[instrument(skip(st), fields(party = %party))]
pub async fn delete_photo(st: &AppState, party: &PartyId, file_name: &str) -> AppResult<()> {
    let original = st.files.photo_path(party, file_name)?;
    let thumb = st.files.thumbnail_path(party, file_name)?;

    repo::delete_by_file_name(&st.db, file_name, party).await?;

    match st.files.delete(&original).await {
        Ok(()) => {}
        Err(AppError::NotFound(_)) => warn!(%file_name, "photo row had no file on disk"),
        Err(e) => return Err(e),
    }
    match st.files.delete(&thumb).await {
        Ok(()) | Err(AppError::NotFound(_)) => {}
        Err(e) => warn!(error = %e, %file_name, "thumbnail not removed"),
    }

    info!(%file_name, "photo deleted");
    Ok(())
}

pub fn mime_from_ext(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
