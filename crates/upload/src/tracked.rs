//! Uploads tracked in a [`QueueStore`].
//!
//! Wires the orchestrator's callbacks into the queue: progress is queued for
//! the next flush, each destination's result lands in its own slot (even
//! when it arrives in the background, long after the item was decided), and
//! the outcome finishes the item.

use crate::eligibility::Rejection;
use crate::error::{ErrorKind, Result};
use crate::uploader::{CombinedOutcome, UploadHooks, Uploader};
use exn::ResultExt;
use fanout_destination::{
    DestinationId, DestinationResult, DestinationSettings, ErrorDescriptor, FailureCode, ProgressEvent, ProgressSink,
};
use fanout_queue::error::ErrorKind as QueueErrorKind;
use fanout_queue::{QueueItem, QueueItemId, QueueStore};
use std::sync::Arc;

fn queued(store: &QueueStore, item: QueueItemId) -> Result<QueueItem> {
    store.get(item).ok_or(QueueErrorKind::ItemNotFound(item)).or_raise(|| ErrorKind::Queue)
}

/// Record a whole-run error against destinations that never produced a
/// result of their own.
fn record_error(store: &QueueStore, item: QueueItemId, destinations: &[DestinationId], error: &ErrorKind) {
    let descriptor = ErrorDescriptor::new(error.code(), error.to_string(), error.is_retryable());
    for destination in destinations {
        store.record_destination_result(item, &DestinationResult::failure(destination.clone(), descriptor.clone()));
    }
}

fn record_rejection(store: &QueueStore, item: QueueItemId, rejection: &Rejection) {
    let descriptor = ErrorDescriptor::new(FailureCode::Config, rejection.reason.to_string(), false);
    store.record_destination_result(item, &DestinationResult::failure(rejection.destination.clone(), descriptor));
}

/// Upload a queued item to its destinations, keeping the queue up to date.
///
/// The item must be pending (new, or reset for retry). It is marked running,
/// then finished with the primary URL or the error. Requested destinations that were skipped get a `CONFIG` failure in
/// their slot. `hooks` still receive every callback.
pub async fn upload_tracked(
    uploader: &Uploader,
    store: &QueueStore,
    item: QueueItemId,
    settings: &DestinationSettings,
    hooks: UploadHooks,
) -> Result<CombinedOutcome> {
    let queued = queued(store, item)?;
    if !store.mark_running(item) {
        let status = store.get(item).map_or(queued.status, |current| current.status);
        return Err(QueueErrorKind::ItemNotPending { item, status }).or_raise(|| ErrorKind::Queue);
    }

    let UploadHooks { on_progress, on_result } = hooks;
    let progress_store = store.clone();
    let result_store = store.clone();
    let tracked_hooks = UploadHooks::new()
        .on_progress(move |event| {
            if let Some(on_progress) = &on_progress {
                on_progress(event.clone());
            }
            progress_store.queue_progress(item, event);
        })
        .on_result(move |result| {
            result_store.record_destination_result(item, &result);
            if let Some(on_result) = &on_result {
                on_result(result);
            }
        });

    match uploader.upload(&queued.file_path, &queued.destinations, settings, tracked_hooks).await {
        Ok(outcome) => {
            for rejection in &outcome.rejected {
                record_rejection(store, item, rejection);
            }
            store.mark_success(item, outcome.primary_url.clone());
            Ok(outcome)
        },
        Err(err) => {
            match &*err {
                ErrorKind::NoConfiguredDestination(rejections) => {
                    for rejection in &rejections.0 {
                        record_rejection(store, item, rejection);
                    }
                },
                // Every attempted destination already recorded its own failure.
                ErrorKind::TotalFailure(_) => {},
                other => record_error(store, item, &queued.destinations, other),
            }
            store.mark_failure(item, (*err).to_string());
            Err(err)
        },
    }
}

/// Retry one destination of a queued item.
///
/// The destination's slot must hold a failure. It is reset (reopening the
/// item if it had failed as a whole), retried, and the new result recorded.
/// A successful retry of a failed item finishes it with this destination's
/// URL. Items that already succeeded keep their status and primary URL.
pub async fn retry_tracked(
    uploader: &Uploader,
    store: &QueueStore,
    item: QueueItemId,
    destination: &DestinationId,
    settings: &DestinationSettings,
    on_progress: Option<ProgressSink>,
) -> Result<DestinationResult> {
    let queued = queued(store, item)?;
    store.reset_destination(item, destination).or_raise(|| ErrorKind::Queue)?;
    store.mark_running(item);

    let progress_store = store.clone();
    let sink: ProgressSink = Arc::new(move |event: ProgressEvent| {
        if let Some(on_progress) = &on_progress {
            on_progress(event.clone());
        }
        progress_store.queue_progress(item, event);
    });

    match uploader.retry(&queued.file_path, destination, settings, Some(sink)).await {
        Ok(result) => {
            store.record_destination_result(item, &result);
            match (result.url(), result.error()) {
                (Some(url), _) => store.mark_success(item, url),
                (None, Some(error)) => store.mark_failure(item, format!("{destination}: {error}")),
                (None, None) => false,
            };
            Ok(result)
        },
        Err(err) => {
            record_error(store, item, std::slice::from_ref(destination), &err);
            store.mark_failure(item, (*err).to_string());
            Err(err)
        },
    }
}
