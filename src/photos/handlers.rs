use std::path::Path as FsPath;

use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tokio_util::io::ReaderStream;
use tracing::{error, info, instrument};

use super::{
    archive,
    dto::{AcceptedOnlyQuery, ChangeStatusQuery, PictureItem, PicturesResponse, UploadQuery},
    repo_types::PhotoStatus,
    services::{self, mime_from_ext, IncomingFile},
};
use crate::{
    auth::AuthSession,
    config::UploadConfig,
    error::{AppError, AppResult},
    state::AppState,
};

pub const UPLOAD_CONFIRMATION: &str = "/uploadConfirmation.html";
const ARCHIVE_PIPE_BYTES: usize = 64 * 1024;
// multipart framing on top of the file bytes
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// --- routers ---

pub fn upload_routes(upload: &UploadConfig) -> Router<AppState> {
    let limit = (upload.max_file_bytes as usize)
        .saturating_mul(upload.max_files)
        .saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/upload", post(upload_photos))
        .layer(DefaultBodyLimit::max(limit))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/getpic/:filename", get(get_pic))
        .route("/admin/getthumbnail/:filename", get(get_thumbnail))
        .route("/admin/getpics", get(get_pics))
        .route("/admin/changepicstatus", get(change_pic_status))
        .route("/admin/downloadzip", get(download_zip))
        .route("/admin/deletepic/:filename", delete(delete_pic))
}

// --- handlers ---

/// POST /upload?partyname=<party> (multipart, any number of file fields)
#[instrument(skip(state, mp))]
pub async fn upload_photos(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    mut mp: Multipart,
) -> AppResult<Redirect> {
    let party = services::admit_party(&state, q.partyname.as_deref()).await?;
    let max_files = state.config.upload.max_files;
    let max_file_bytes = state.config.upload.max_file_bytes;

    let mut stored = 0usize;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_file_bytes))?
    {
        // plain form fields carry no file name
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if stored >= max_files {
            return Err(AppError::TooManyFiles { max: max_files });
        }
        let incoming = IncomingFile {
            original_name,
            content_type: field.content_type().map(str::to_string),
        };
        services::ingest_file(&state, &party, incoming, field).await?;
        stored += 1;
    }

    if stored == 0 {
        return Err(AppError::NoFiles);
    }
    info!(%party, files = stored, "upload complete");
    Ok(Redirect::to(UPLOAD_CONFIRMATION))
}

fn multipart_error(e: MultipartError, max_file_bytes: u64) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit: max_file_bytes }
    } else {
        AppError::Validation(format!("Invalid upload body: {}", e.body_text()))
    }
}

#[instrument(skip(state), fields(party = %session.party))]
pub async fn get_pic(
    State(state): State<AppState>,
    session: AuthSession,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    let path = state.files.photo_path(&session.party, &filename)?;
    services::ensure_registered(&state, &session.party, &filename).await?;
    stream_file(&state, &path, &filename).await
}

#[instrument(skip(state), fields(party = %session.party))]
pub async fn get_thumbnail(
    State(state): State<AppState>,
    session: AuthSession,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    let path = state.files.thumbnail_path(&session.party, &filename)?;
    services::ensure_registered(&state, &session.party, &filename).await?;
    stream_file(&state, &path, &filename).await
}

async fn stream_file(state: &AppState, path: &FsPath, file_name: &str) -> AppResult<Response> {
    let file = state.files.open(path).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, mime_from_ext(file_name))], body).into_response())
}

#[instrument(skip(state), fields(party = %session.party))]
pub async fn get_pics(
    State(state): State<AppState>,
    session: AuthSession,
    Query(q): Query<AcceptedOnlyQuery>,
) -> AppResult<Json<PicturesResponse>> {
    let photos = services::list(&state, &session.party, q.acceptedonly.unwrap_or(false)).await?;
    Ok(Json(PicturesResponse {
        pictures: photos.into_iter().map(PictureItem::from).collect(),
    }))
}

#[instrument(skip(state), fields(party = %session.party))]
pub async fn change_pic_status(
    State(state): State<AppState>,
    session: AuthSession,
    Query(q): Query<ChangeStatusQuery>,
) -> AppResult<&'static str> {
    let (Some(file_name), Some(status)) = (q.filename.filter(|f| !f.is_empty()), q.status) else {
        return Err(AppError::Validation(
            "Missing filename or status query param".into(),
        ));
    };
    let status = PhotoStatus::parse(&status)?;
    services::change_status(&state, &session.party, &file_name, status).await?;
    Ok("ok")
}

/// Streams the archive while it is being built; the writer runs in its own
/// task and errors after the headers went out can only be logged.
#[instrument(skip(state), fields(party = %session.party))]
pub async fn download_zip(
    State(state): State<AppState>,
    session: AuthSession,
    Query(q): Query<AcceptedOnlyQuery>,
) -> AppResult<Response> {
    let photos = services::list(&state, &session.party, q.acceptedonly.unwrap_or(false)).await?;

    let (writer, reader) = tokio::io::duplex(ARCHIVE_PIPE_BYTES);
    let files = state.files.clone();
    let party = session.party.clone();
    tokio::spawn(async move {
        match archive::write_archive(&files, &party, &photos, writer).await {
            Ok((_, entries)) => info!(%party, entries, "archive streamed"),
            Err(e) => error!(%party, error = %e, "archive stream aborted"),
        }
    });

    let disposition = format!(
        "attachment; filename=\"{}\"",
        archive::archive_file_name(&session.party)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

#[instrument(skip(state), fields(party = %session.party))]
pub async fn delete_pic(
    State(state): State<AppState>,
    session: AuthSession,
    Path(filename): Path<String>,
) -> AppResult<(StatusCode, &'static str)> {
    services::delete_photo(&state, &session.party, &filename).await?;
    Ok((StatusCode::OK, "Photo deleted successfully."))
}
