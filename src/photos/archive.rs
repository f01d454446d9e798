//! Streaming ZIP export of a party's photos.
//!
//! Entries are copied file by file into the writer; nothing but the copy
//! buffers is held in memory.

use anyhow::Context;
use async_zip::{tokio::write::ZipFileWriter, Compression, ZipEntryBuilder};
use tokio::io::AsyncWrite;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, warn};

use super::repo_types::Photo;
use crate::{error::AppError, storage::{PartyFileStore, PartyId}};

pub fn archive_file_name(party: &PartyId) -> String {
    format!("{party}_photos.zip")
}

/// Write every photo that still exists on disk into a ZIP on `out`, named by
/// its stored name. Returns the writer and the number of entries written.
pub async fn write_archive<W>(
    files: &PartyFileStore,
    party: &PartyId,
    photos: &[Photo],
    out: W,
) -> anyhow::Result<(W, usize)>
where
    W: AsyncWrite + Unpin,
{
    let mut zip = ZipFileWriter::with_tokio(out);
    let mut entries = 0usize;

    for photo in photos {
        let path = match files.photo_path(party, &photo.file_name) {
            Ok(p) => p,
            Err(_) => {
                warn!(%party, file_name = %photo.file_name, "unsafe stored name skipped");
                continue;
            }
        };
        let file = match files.open(&path).await {
            Ok(f) => f,
            Err(AppError::NotFound(_)) => {
                warn!(%party, file_name = %photo.file_name, "photo missing on disk, skipped");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let builder = ZipEntryBuilder::new(photo.file_name.clone().into(), Compression::Deflate);
        let mut entry = zip
            .write_entry_stream(builder)
            .await
            .context("start zip entry")?;
        futures_util::io::copy(file.compat(), &mut entry)
            .await
            .with_context(|| format!("copy {} into archive", photo.file_name))?;
        entry.close().await.context("finish zip entry")?;

        debug!(file_name = %photo.file_name, "archived");
        entries += 1;
    }

    let out = zip.close().await.context("finish zip archive")?;
    Ok((out.into_inner(), entries))
}
