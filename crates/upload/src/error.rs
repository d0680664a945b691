//! Upload Error Types
//!
//! Only whole-run conditions are errors. A single destination failing is
//! recorded as a failed [`DestinationResult`] and never surfaces here unless
//! every destination failed.

use crate::eligibility::Rejection;
use derive_more::{Display, Error};
use fanout_destination::{DestinationId, DestinationResult, ErrorDescriptor, FailureCode};
use std::fmt;
use std::path::PathBuf;

/// An upload error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for upload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Every requested destination that was filtered out, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionList(pub Vec<Rejection>);
impl fmt::Display for RejectionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rejections: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&rejections.join("; "))
    }
}

/// Every attempted destination with the reason it failed, in completion
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureList(pub Vec<(DestinationId, ErrorDescriptor)>);
impl FailureList {
    pub(crate) fn from_results(results: &[DestinationResult]) -> Self {
        Self(
            results
                .iter()
                .filter_map(|result| result.error().map(|error| (result.destination.clone(), error.clone())))
                .collect(),
        )
    }
}
impl fmt::Display for FailureList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures: Vec<_> = self.0.iter().map(|(destination, error)| format!("{destination}: {error}")).collect();
        f.write_str(&failures.join("; "))
    }
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The caller asked for zero destinations
    #[display("no destinations selected")]
    NoDestinationsSelected,
    /// Destinations were requested, but none of them can be attempted
    #[display("no configured destination ({_0})")]
    NoConfiguredDestination(#[error(not(source))] RejectionList),
    /// Every attempted destination failed
    #[display("upload failed on every destination ({_0})")]
    TotalFailure(#[error(not(source))] FailureList),
    /// The source file can't be read; nothing was attempted
    #[display("cannot read file: {}", _0.display())]
    UnreadableFile(#[error(not(source))] PathBuf),
    /// Queue bookkeeping for a tracked retry failed
    #[display("queue error")]
    Queue,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TotalFailure(failures) => failures.0.iter().any(|(_, error)| error.retryable),
            _ => false,
        }
    }

    /// Failure category used when this error is recorded against a single
    /// destination.
    pub fn code(&self) -> FailureCode {
        match self {
            Self::NoDestinationsSelected | Self::NoConfiguredDestination(_) => FailureCode::Config,
            Self::TotalFailure(_) => FailureCode::Upload,
            Self::UnreadableFile(_) => FailureCode::FileIo,
            Self::Queue => FailureCode::Internal,
        }
    }
}
