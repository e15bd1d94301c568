//! Filesystem helpers for atomic output files.
//!
//! Outputs are written next to their final path and renamed into place, so a
//! crashed or redelivered job never observes a half-written file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Write `data` to `path` through a temp file in the same directory.
pub async fn write_atomic(path: impl AsRef<Path>, data: Vec<u8>) -> MediaResult<()> {
    let path = path.as_ref().to_path_buf();
    let dir = parent_dir(&path);
    fs::create_dir_all(&dir).await?;

    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| MediaError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| MediaError::internal(format!("write task failed: {}", e)))?
}

/// Move a file from `src` to `dst`, falling back to copy+rename across devices.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    fs::create_dir_all(parent_dir(dst)).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let data = fs::read(src).await?;
            write_atomic(dst, data).await?;
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!("Failed to remove {} after move: {}", src.display(), e);
            }
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Sibling path used while an output is being produced.
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}
