//! Destination Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Adapter errors never reach the caller
//! of an orchestration run as errors: they get flattened into an
//! [`ErrorDescriptor`] with [`ErrorKind::descriptor`] and recorded as data.

use crate::models::{ErrorDescriptor, FailureCode};
use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A destination error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for destination operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Source file does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Source file (or destination directory) is not accessible
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Connection failures, resets, DNS...
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The remote did not answer in time
    #[display("request timed out")]
    Timeout,
    /// Credentials were refused (expired cookie, revoked token)
    #[display("authentication failed: {_0}")]
    Auth(#[error(not(source))] String),
    /// The remote answered but refused the upload
    #[display("upload rejected: {_0}")]
    Rejected(#[error(not(source))] String),
    /// The remote refused the upload with an explicit status code
    #[display("upload rejected ({status}): {message}")]
    RejectedWithStatus { status: u16, message: String },
    /// Destination settings are unusable
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
    /// The file itself is not acceptable to this destination (size, type)
    #[display("file not accepted: {_0}")]
    Validation(#[error(not(source))] String),
    /// Object storage failures that aren't network related
    #[display("storage error: {_0}")]
    Storage(#[error(not(source))] String),
    /// The adapter panicked mid-upload
    #[display("adapter panicked: {_0}")]
    Panicked(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Classify an I/O error that happened while touching `path`.
    pub fn io(err: IoError, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Network(_) | Self::Timeout | Self::Storage(_) => true,
            Self::RejectedWithStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Failure category reported alongside the message.
    pub fn code(&self) -> FailureCode {
        match self {
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Io(_) => FailureCode::FileIo,
            Self::Network(_) => FailureCode::Network,
            Self::Timeout => FailureCode::Timeout,
            Self::Auth(_) => FailureCode::Auth,
            Self::Rejected(_) | Self::RejectedWithStatus { .. } => FailureCode::Upload,
            Self::Config(_) => FailureCode::Config,
            Self::Validation(_) => FailureCode::Validation,
            Self::Storage(_) => FailureCode::Storage,
            Self::Panicked(_) => FailureCode::Internal,
        }
    }

    /// Flatten into the serializable form stored on a failed result.
    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor::new(self.code(), self.to_string(), self.is_retryable())
    }
}
