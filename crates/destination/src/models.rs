//! Destination models.
//!
//! These types are the data half of the adapter contract: what an upload
//! produces, how a failure is described once it has been flattened out of an
//! error tree, and the per-destination result that gets handed to observers
//! and persisted by callers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use time::OffsetDateTime;

/// Identifier of a destination (the key it's registered and configured under).
#[derive(Debug, Clone, Display, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);
impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for DestinationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
impl From<String> for DestinationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
impl AsRef<str> for DestinationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
// Lets maps keyed by DestinationId be queried with a plain &str.
impl Borrow<str> for DestinationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What a successful upload returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Public link to the uploaded file
    pub url: String,
    /// Number of bytes the destination accepted
    pub size_bytes: u64,
    /// Destination-specific key (object key, content hash, image PID...)
    pub key: Option<String>,
}
impl UploadReceipt {
    pub fn new(url: impl Into<String>, size_bytes: u64) -> Self {
        Self { url: url.into(), size_bytes, key: None }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Failure categories, serialized the way the hosting adapters have always
/// reported them.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    #[display("NETWORK")]
    Network,
    #[display("AUTH")]
    Auth,
    #[display("FILE_IO")]
    FileIo,
    #[display("UPLOAD")]
    Upload,
    #[display("CONFIG")]
    Config,
    #[display("VALIDATION")]
    Validation,
    #[display("STORAGE")]
    Storage,
    #[display("TIMEOUT")]
    Timeout,
    #[display("INTERNAL")]
    Internal,
}

/// A failure, flattened into data.
#[derive(Debug, Clone, Display, PartialEq, Eq, Serialize, Deserialize)]
#[display("[{code}] {message}")]
pub struct ErrorDescriptor {
    pub code: FailureCode,
    pub message: String,
    pub retryable: bool,
}
impl ErrorDescriptor {
    pub fn new(code: FailureCode, message: impl Into<String>, retryable: bool) -> Self {
        Self { code, message: message.into(), retryable }
    }
}

/// Terminal status of a single destination.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    #[display("success")]
    Success,
    #[display("failed")]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DestinationOutcome {
    Success(UploadReceipt),
    Failed(ErrorDescriptor),
}

/// Outcome of one destination within one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationResult {
    pub destination: DestinationId,
    pub outcome: DestinationOutcome,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}
impl DestinationResult {
    pub fn success(destination: DestinationId, receipt: UploadReceipt) -> Self {
        Self {
            destination,
            outcome: DestinationOutcome::Success(receipt),
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn failure(destination: DestinationId, error: ErrorDescriptor) -> Self {
        Self {
            destination,
            outcome: DestinationOutcome::Failed(error),
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn status(&self) -> DestinationStatus {
        match self.outcome {
            DestinationOutcome::Success(_) => DestinationStatus::Success,
            DestinationOutcome::Failed(_) => DestinationStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DestinationOutcome::Success(_))
    }

    pub fn receipt(&self) -> Option<&UploadReceipt> {
        match &self.outcome {
            DestinationOutcome::Success(receipt) => Some(receipt),
            DestinationOutcome::Failed(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.receipt().map(|receipt| receipt.url.as_str())
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match &self.outcome {
            DestinationOutcome::Success(_) => None,
            DestinationOutcome::Failed(error) => Some(error),
        }
    }
}

/// Adapter-level verdict on a destination's settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}
impl ValidationReport {
    pub fn valid() -> Self {
        Self::default()
    }

    pub fn invalid(errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { errors: errors.into_iter().map(Into::into).collect() }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}
