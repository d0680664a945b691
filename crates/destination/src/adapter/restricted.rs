//! Restriction decorator.
//!
//! Wraps another adapter and refuses files the wrapped destination is known to
//! reject anyway (image hosts with a 5 MB cap, hosts that only take images),
//! failing fast with [`ErrorKind::Validation`] before any bytes leave the
//! machine.

use crate::adapter::DestinationAdapter;
use crate::error::{ErrorKind, Result};
use crate::models::{DestinationId, UploadReceipt, ValidationReport};
use crate::progress::ProgressReporter;
use crate::source::{extension, source_size};
use crate::AdapterHandle;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

/// Size and file type limits in front of another destination.
///
/// # Examples
///
/// ```
/// use fanout_destination::adapter::{DestinationAdapter, LocalDirectoryAdapter, Restricted};
/// use std::sync::Arc;
///
/// let images_only = Restricted::new(Arc::new(LocalDirectoryAdapter::new("gallery")))
///     .max_size(5 * 1024 * 1024)
///     .extensions(["jpg", "jpeg", "png", "gif", "bmp", "webp"]);
/// assert_eq!(images_only.id().as_str(), "gallery");
/// ```
#[derive(Clone)]
pub struct Restricted {
    inner: AdapterHandle,
    max_size: Option<u64>,
    extensions: Option<Vec<String>>,
}
impl Restricted {
    pub fn new(inner: AdapterHandle) -> Self {
        Self { inner, max_size: None, extensions: None }
    }

    /// Reject files larger than `bytes`.
    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    /// Only accept these (case-insensitive) extensions.
    pub fn extensions(mut self, extensions: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.extensions = Some(extensions.into_iter().map(|ext| ext.as_ref().to_ascii_lowercase()).collect());
        self
    }

    async fn check(&self, file: &Path) -> Result<()> {
        if let Some(allowed) = &self.extensions {
            let ext = extension(file);
            if !ext.as_ref().is_some_and(|ext| allowed.contains(ext)) {
                exn::bail!(ErrorKind::Validation(format!(
                    "{} only accepts {} files",
                    self.inner.id(),
                    allowed.join(", ")
                )));
            }
        }
        if let Some(max_size) = self.max_size {
            let size = source_size(file).await?;
            if size > max_size {
                exn::bail!(ErrorKind::Validation(format!(
                    "file is {:.2} MB, {} accepts at most {:.2} MB",
                    size as f64 / 1024.0 / 1024.0,
                    self.inner.id(),
                    max_size as f64 / 1024.0 / 1024.0
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationAdapter for Restricted {
    fn id(&self) -> &DestinationId {
        self.inner.id()
    }

    fn required_fields(&self) -> &[&'static str] {
        self.inner.required_fields()
    }

    fn validate(&self, settings: Option<&Value>) -> ValidationReport {
        self.inner.validate(settings)
    }

    async fn upload(
        &self,
        file: &Path,
        settings: Option<&Value>,
        progress: &ProgressReporter,
    ) -> Result<UploadReceipt> {
        self.check(file).await?;
        self.inner.upload(file, settings, progress).await
    }
}
