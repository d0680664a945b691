//! Upload destinations.
//!
//! A destination is one independently operated hosting backend. This crate
//! holds the contract every destination implements
//! ([`DestinationAdapter`]), the data an upload produces
//! ([`DestinationResult`], [`ErrorDescriptor`]), the [`ProgressRouter`] that
//! tags progress with the destination it came from, and the
//! [`DestinationRegistry`] the orchestrator looks adapters up in.
//!
//! Bundled adapters:
//! - [`LocalDirectoryAdapter`](adapter::LocalDirectoryAdapter), copies into a
//!   directory (optionally served under a base URL).
//! - `S3Adapter` (feature `s3`), any S3-compatible object store.
//! - [`Restricted`](adapter::Restricted), a decorator enforcing size and
//!   file type limits in front of another adapter.
//! - `MockDestination` (feature `mock`), scripted adapter for tests.

pub mod adapter;
pub mod error;
mod key;
mod models;
mod progress;
mod registry;
mod settings;
mod source;

pub use crate::adapter::DestinationAdapter;
pub use crate::key::{content_key, normalize_prefix};
pub use crate::models::{
    DestinationId, DestinationOutcome, DestinationResult, DestinationStatus, ErrorDescriptor, FailureCode,
    UploadReceipt, ValidationReport,
};
pub use crate::progress::{ProgressEvent, ProgressReporter, ProgressRouter, ProgressSink};
pub use crate::registry::DestinationRegistry;
pub use crate::settings::{Completeness, DestinationSettings, completeness, optional_str, required_str};
pub use crate::source::{extension, file_name, read_source, source_size};
use std::sync::Arc;

pub type AdapterHandle = Arc<dyn DestinationAdapter>;
