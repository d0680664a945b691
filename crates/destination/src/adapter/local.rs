//! Local directory destination.
//!
//! Copies the file into a directory on the local filesystem (a NAS mount, a
//! synced folder, the docroot of a static file server). Files are stored
//! under their content-addressed key so repeated uploads of the same bytes
//! are free.

use crate::adapter::DestinationAdapter;
use crate::error::{ErrorKind, Result};
use crate::key::content_key;
use crate::models::{DestinationId, UploadReceipt, ValidationReport};
use crate::progress::ProgressReporter;
use crate::settings::{optional_str, required_str};
use crate::source::{extension, read_source};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const TOTAL_STEPS: u32 = 3;

/// Local filesystem destination.
///
/// # Settings
/// - `directory` (required): absolute path of the target directory, created
///   if it doesn't exist.
/// - `base_url` (optional): URL the directory is served under. Without it the
///   returned link is a `file://` URL.
///
/// # Examples
///
/// ```no_run
/// use fanout_destination::adapter::{DestinationAdapter, LocalDirectoryAdapter};
/// use fanout_destination::ProgressReporter;
/// use serde_json::json;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let adapter = LocalDirectoryAdapter::new("mirror");
/// let settings = json!({"directory": "/srv/mirror", "base_url": "https://cdn.example.com"});
/// let progress = ProgressReporter::detached(adapter.id().clone());
/// let receipt = adapter.upload(Path::new("/tmp/cat.png"), Some(&settings), &progress).await?;
/// assert!(receipt.url.starts_with("https://cdn.example.com/"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalDirectoryAdapter {
    id: DestinationId,
}
impl LocalDirectoryAdapter {
    pub fn new(id: impl Into<DestinationId>) -> Self {
        Self { id: id.into() }
    }

    fn public_url(base_url: Option<&str>, target: &Path, key: &str) -> String {
        match base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("file://{}", target.display()),
        }
    }
}

#[async_trait]
impl DestinationAdapter for LocalDirectoryAdapter {
    fn id(&self) -> &DestinationId {
        &self.id
    }

    fn required_fields(&self) -> &[&'static str] {
        &["directory"]
    }

    fn validate(&self, settings: Option<&Value>) -> ValidationReport {
        let mut errors = Vec::new();
        if let Some(directory) = optional_str(settings, "directory")
            && !Path::new(directory).is_absolute()
        {
            errors.push(format!("`directory` must be an absolute path, got `{directory}`"));
        }
        if let Some(base_url) = optional_str(settings, "base_url")
            && !(base_url.starts_with("http://") || base_url.starts_with("https://"))
        {
            errors.push(format!("`base_url` must be an http(s) URL, got `{base_url}`"));
        }
        ValidationReport::invalid(errors)
    }

    async fn upload(
        &self,
        file: &Path,
        settings: Option<&Value>,
        progress: &ProgressReporter,
    ) -> Result<UploadReceipt> {
        let directory = PathBuf::from(required_str(settings, "directory")?);
        if !directory.is_absolute() {
            exn::bail!(ErrorKind::Config(format!("`directory` is not absolute: {}", directory.display())));
        }

        progress.step(1, TOTAL_STEPS, 0, "reading file");
        let contents = read_source(file).await?;
        let key = content_key(None, &contents, extension(file).as_deref());
        let target = directory.join(&key);

        progress.step(2, TOTAL_STEPS, 33, "preparing directory");
        tokio::fs::create_dir_all(&directory).await.map_err(|e| ErrorKind::io(e, &directory))?;

        progress.step(3, TOTAL_STEPS, 66, "copying");
        let size = contents.len() as u64;
        match tokio::fs::metadata(&target).await {
            // Content-addressed: same key and same size means same bytes.
            Ok(existing) if existing.len() == size => {
                tracing::debug!(destination = %self.id, key = %key, "File already present in directory; skipping copy");
            },
            _ => {
                // Write to a uniquely named file next to the target then rename,
                // so a crash never leaves a truncated file under a valid key and
                // concurrent copies of the same bytes never share a partial file.
                let partial = NamedTempFile::new_in(&directory).map_err(|e| ErrorKind::io(e, &directory))?;
                tokio::fs::write(partial.path(), &contents).await.map_err(|e| ErrorKind::io(e, partial.path()))?;
                partial.persist(&target).map_err(|e| ErrorKind::io(e.error, &target))?;
            },
        }
        progress.percent(100);

        let url = Self::public_url(optional_str(settings, "base_url"), &target, &key);
        Ok(UploadReceipt::new(url, size).with_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressEvent, ProgressRouter};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn source(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_validate() {
        let adapter = LocalDirectoryAdapter::new("local");
        assert!(adapter.validate(Some(&json!({"directory": "/srv"}))).is_valid());
        let report = adapter.validate(Some(&json!({"directory": "relative", "base_url": "ftp://nope"})));
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_copies_under_content_key() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let file = source(source_dir.path(), "cat.png", b"meow");
        let adapter = LocalDirectoryAdapter::new("local");
        let settings = json!({"directory": target_dir.path(), "base_url": "https://cdn.example.com/"});

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let router = ProgressRouter::new(Arc::new(move |e: ProgressEvent| sink_events.lock().unwrap().push(e)));
        let receipt = adapter.upload(&file, Some(&settings), &router.reporter("local".into())).await.unwrap();

        let key = receipt.key.clone().unwrap();
        assert!(key.ends_with(".png"));
        assert_eq!(receipt.size_bytes, 4);
        assert_eq!(receipt.url, format!("https://cdn.example.com/{key}"));
        assert_eq!(std::fs::read(target_dir.path().join(&key)).unwrap(), b"meow");
        assert_eq!(std::fs::read_dir(target_dir.path()).unwrap().count(), 1);

        let percents: Vec<_> = events.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![0, 33, 66, 100]);
    }

    #[tokio::test]
    async fn test_upload_without_base_url_returns_file_url() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let file = source(source_dir.path(), "notes.txt", b"hello");
        let adapter = LocalDirectoryAdapter::new("local");
        let settings = json!({"directory": target_dir.path()});
        let receipt =
            adapter.upload(&file, Some(&settings), &ProgressReporter::detached("local".into())).await.unwrap();
        assert!(receipt.url.starts_with("file://"));
        // Uploading the same bytes again is a no-op returning the same key.
        let again =
            adapter.upload(&file, Some(&settings), &ProgressReporter::detached("local".into())).await.unwrap();
        assert_eq!(again.key, receipt.key);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_same_bytes() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let file = source(source_dir.path(), "cat.png", b"meow");
        let adapter = LocalDirectoryAdapter::new("local");
        let settings = json!({"directory": target_dir.path()});
        let progress = ProgressReporter::detached("local".into());
        let upload = || adapter.upload(&file, Some(&settings), &progress);

        let (a, b, c, d) = tokio::join!(upload(), upload(), upload(), upload());
        let keys: Vec<_> = [a, b, c, d].into_iter().map(|receipt| receipt.unwrap().key.unwrap()).collect();
        assert!(keys.iter().all(|key| *key == keys[0]));
        assert_eq!(std::fs::read(target_dir.path().join(&keys[0])).unwrap(), b"meow");
        // No temporary files left behind.
        assert_eq!(std::fs::read_dir(target_dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_upload_missing_source() {
        let target_dir = tempfile::tempdir().unwrap();
        let adapter = LocalDirectoryAdapter::new("local");
        let settings = json!({"directory": target_dir.path()});
        let err = adapter
            .upload(Path::new("/no/such/file.png"), Some(&settings), &ProgressReporter::detached("local".into()))
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_without_settings() {
        let adapter = LocalDirectoryAdapter::new("local");
        let err = adapter
            .upload(Path::new("/tmp/x.png"), None, &ProgressReporter::detached("local".into()))
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }
}
