//! Atomic file writes shared by the vector and document artifacts.
//!
//! Every artifact is staged next to its final path as `<name>.tmp` and then
//! renamed into place, so a reader never observes a half-written file.

use hybridrag_core::RagResult;
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk format version written into every artifact.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Write `bytes` to a temp file beside `path` and return the temp path.
pub(crate) async fn stage(path: &Path, bytes: &[u8]) -> RagResult<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = tmp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        discard(&[&tmp]).await;
        return Err(e.into());
    }
    Ok(tmp)
}

/// Move a staged temp file over its final path.
pub(crate) async fn commit(tmp: &Path, path: &Path) -> RagResult<()> {
    tokio::fs::rename(tmp, path).await?;
    Ok(())
}

/// Best-effort removal of staged temp files after a failed save.
pub(crate) async fn discard<P: AsRef<Path>>(staged: &[P]) {
    for tmp in staged {
        let tmp = tmp.as_ref();
        match tokio::fs::remove_file(tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %tmp.display(), error = %e, "Failed to remove staged file"),
        }
    }
}

/// Stage and commit in one step.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> RagResult<()> {
    let tmp = stage(path, bytes).await?;
    if let Err(e) = commit(&tmp, path).await {
        discard(&[&tmp]).await;
        return Err(e);
    }
    Ok(())
}

/// Read an artifact, mapping "file does not exist" to `None`.
pub(crate) async fn read_if_exists(path: &Path) -> RagResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
