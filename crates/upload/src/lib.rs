//! Multi-destination upload orchestration.
//!
//! One file goes to every requested destination at once. [`Uploader::upload`]
//! resolves as soon as the outcome is decided: the first destination to
//! succeed becomes the primary, and destinations marked as background in the
//! [`LaunchPolicy`] keep running after that point without holding the caller
//! up. Their results still arrive through [`UploadHooks::on_result`].
//!
//! # Flow
//! 1. Requested destinations are filtered: unknown, unconfigured or invalid
//!    ones become [`Rejection`]s and are never attempted.
//! 2. The source file is checked once, before any destination starts.
//! 3. Every eligible destination is launched concurrently. Results are
//!    delivered exactly once each, in completion order.
//! 4. The run succeeds with a [`CombinedOutcome`] if anything succeeded, and
//!    fails with [`TotalFailure`](error::ErrorKind::TotalFailure) otherwise.
//!
//! [`upload_tracked`] and [`retry_tracked`] run the same flow against a
//! [`QueueStore`](fanout_queue::QueueStore) item.

mod eligibility;
pub mod error;
mod policy;
pub mod tracked;
mod uploader;

pub use crate::eligibility::{Rejection, RejectionReason};
pub use crate::policy::LaunchPolicy;
pub use crate::tracked::{retry_tracked, upload_tracked};
pub use crate::uploader::{CombinedOutcome, PartialFailure, ResultCallback, UploadHooks, Uploader};
