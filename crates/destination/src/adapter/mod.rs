//! Destination adapter trait and implementations.
//!
//! This module defines the `DestinationAdapter` trait, the capability every
//! hosting backend implements so the orchestrator can treat them all the
//! same: check settings, push one file, report progress, hand back a receipt
//! or an error.

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod restricted;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalDirectoryAdapter;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockDestination;
pub use self::restricted::Restricted;
#[cfg(feature = "s3")]
pub use self::s3::S3Adapter;
use crate::error::Result;
use crate::models::{DestinationId, UploadReceipt, ValidationReport};
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

/// Unified interface for upload destinations.
///
/// Implementations know their own wire protocol; callers only know this
/// trait. Settings are passed per call (not at construction) so that one
/// registered adapter can serve any number of accounts.
///
/// # Settings
/// The orchestrator checks [`required_fields()`](Self::required_fields)
/// generically before calling [`validate()`](Self::validate) and only calls
/// [`upload()`](Self::upload) for destinations that pass both. Adapters
/// should still not trust that `settings` is complete.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use fanout_destination::adapter::DestinationAdapter;
/// use fanout_destination::error::Result;
/// use fanout_destination::{DestinationId, ProgressReporter, UploadReceipt, source_size};
/// use serde_json::Value;
/// use std::path::Path;
///
/// struct Pastebin {
///     id: DestinationId,
/// }
///
/// #[async_trait]
/// impl DestinationAdapter for Pastebin {
///     fn id(&self) -> &DestinationId {
///         &self.id
///     }
///
///     fn required_fields(&self) -> &[&'static str] {
///         &["api_key"]
///     }
///
///     async fn upload(
///         &self,
///         file: &Path,
///         _settings: Option<&Value>,
///         progress: &ProgressReporter,
///     ) -> Result<UploadReceipt> {
///         progress.step(1, 1, 0, "uploading");
///         let size = source_size(file).await?;
///         progress.percent(100);
///         Ok(UploadReceipt::new("https://paste.example/abc", size))
///     }
/// }
/// ```
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    /// Id this adapter is registered and configured under. Used as the key
    /// into [`DestinationSettings`](crate::DestinationSettings) and in every
    /// log line, result and progress event.
    fn id(&self) -> &DestinationId;

    /// Settings fields that must be present and non-empty before this
    /// destination is attempted. Destinations returning an empty list need no
    /// settings at all and are always eligible.
    fn required_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Adapter-specific settings checks, beyond field presence (URL shapes,
    /// absolute paths, value ranges).
    ///
    /// Default implementation accepts everything.
    fn validate(&self, settings: Option<&Value>) -> ValidationReport {
        let _ = settings;
        ValidationReport::valid()
    }

    /// Upload the file at `file` to this destination.
    ///
    /// Progress may be reported any number of times, and need not be
    /// monotonic. Returns the public URL and whatever key the destination
    /// assigned, or an error that the orchestrator will record as a failed
    /// result for this destination only.
    async fn upload(&self, file: &Path, settings: Option<&Value>, progress: &ProgressReporter) -> Result<UploadReceipt>;
}
