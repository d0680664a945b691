//! Helpers for reading the file being uploaded.

use crate::error::{ErrorKind, Result};
use std::path::Path;
use tracing::instrument;

/// Read the whole source file into memory.
///
/// Most hosting APIs want the full body up front (multipart forms, signed
/// `PutObject` payloads) so there isn't much to gain from streaming here.
#[instrument(level = "trace")]
pub async fn read_source(path: &Path) -> Result<Vec<u8>> {
    Ok(tokio::fs::read(path).await.map_err(|e| ErrorKind::io(e, path))?)
}

/// Size of the source file in bytes, without reading it.
pub async fn source_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| ErrorKind::io(e, path))?;
    if !metadata.is_file() {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    Ok(metadata.len())
}

/// Lowercased extension of the source file, if it has one.
pub fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase)
}

/// File name used when a destination wants one (multipart uploads).
pub fn file_name(path: &Path) -> Result<&str> {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => Ok(name),
        None => exn::bail!(ErrorKind::Validation(format!("no usable file name in {}", path.display()))),
    }
}
