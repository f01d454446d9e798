use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

/// Write a thumbnail that fits in `max_dim`×`max_dim`, keeping aspect ratio.
/// The output format follows the destination's extension.
pub fn generate(src: &Path, dst: &Path, max_dim: u32) -> anyhow::Result<()> {
    let img = image::open(src).with_context(|| format!("decode {}", src.display()))?;
    let thumb = img.thumbnail(max_dim, max_dim);
    thumb
        .save(dst)
        .with_context(|| format!("encode {}", dst.display()))?;
    Ok(())
}

/// Run [`generate`] on the blocking pool. Failures are logged, not returned:
/// a photo without a thumbnail is still a valid upload.
pub async fn generate_best_effort(src: PathBuf, dst: PathBuf, max_dim: u32) -> bool {
    let job = tokio::task::spawn_blocking(move || {
        let res = generate(&src, &dst, max_dim);
        (res, dst)
    })
    .await;

    match job {
        Ok((Ok(()), dst)) => {
            debug!(thumbnail = %dst.display(), "thumbnail written");
            true
        }
        Ok((Err(e), dst)) => {
            warn!(error = %e, thumbnail = %dst.display(), "thumbnail generation failed");
            false
        }
        Err(e) => {
            warn!(error = %e, "thumbnail task panicked");
            false
        }
    }
}
