//! Queue Error Types
//!
//! Recording state never fails. The only errors are explicit transitions
//! (starting an upload, resetting for retry) asked of an item or slot that
//! isn't in a state that allows them.

use crate::models::{QueueItemId, QueueStatus, SlotStatus};
use derive_more::{Display, Error};
use fanout_destination::DestinationId;

/// A queue error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("queue item {_0} not found")]
    ItemNotFound(#[error(not(source))] QueueItemId),
    #[display("queue item {item} has no destination {destination}")]
    DestinationNotFound { item: QueueItemId, destination: DestinationId },
    /// Only pending items can be started
    #[display("queue item {item} is {status}, only pending items can be uploaded")]
    ItemNotPending { item: QueueItemId, status: QueueStatus },
    /// Only failed items can be reset for retry
    #[display("queue item {item} is {status}, only failed items can be retried")]
    ItemNotFailed { item: QueueItemId, status: QueueStatus },
    #[display("destination {destination} of queue item {item} is {status}, only failed destinations can be retried")]
    DestinationNotFailed {
        item: QueueItemId,
        destination: DestinationId,
        status: SlotStatus,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
