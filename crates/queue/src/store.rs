//! The queue state store.

use crate::error::{ErrorKind, Result};
use crate::models::{DestinationProgress, QueueItem, QueueItemId, QueueStatus, SlotStatus};
use crate::pending::PendingUpdate;
use fanout_destination::{DestinationId, DestinationResult, ProgressEvent};
use futures::Stream;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::instrument;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    items: BTreeMap<QueueItemId, QueueItem>,
    pending: HashMap<QueueItemId, PendingUpdate>,
}

/// Authoritative state of every queued upload.
///
/// Cheap to clone; all clones share the same state. Any number of tasks may
/// write concurrently (one per destination, plus the flusher). Every
/// operation takes the single internal lock for its whole read-modify-write,
/// so each one is atomic with respect to every other.
///
/// # Progress and terminal states
/// Progress events are not applied when they arrive. They are coalesced into
/// one pending update per item and applied by [`flush()`](Self::flush),
/// usually called on a fixed tick by [`spawn_flusher`](crate::spawn_flusher).
/// Two guards keep a late flush from reverting a finished item:
/// - [`mark_success()`](Self::mark_success) and
///   [`mark_failure()`](Self::mark_failure) discard the item's pending update
///   in the same critical section as the terminal write.
/// - [`flush()`](Self::flush) skips items that are already terminal.
///
/// Once terminal, an item only changes through
/// [`reset_for_retry()`](Self::reset_for_retry) or
/// [`reset_destination()`](Self::reset_destination), except that a
/// destination still running in the background may record its own result
/// into its own (not yet finished) slot.
///
/// # Observing
/// Every change bumps a revision counter. [`changes()`](Self::changes) hands
/// out a [`watch::Receiver`] of it, and [`snapshots()`](Self::snapshots)
/// turns that into a stream of full snapshots.
#[derive(Debug, Clone)]
pub struct QueueStore {
    inner: Arc<Mutex<Inner>>,
    revision: Arc<watch::Sender<u64>>,
}
impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            revision: Arc::new(revision),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Add a file to the queue with a pending slot for each destination.
    pub fn enqueue(&self, file: &Path, destinations: impl IntoIterator<Item = DestinationId>) -> QueueItemId {
        let mut destinations: Vec<DestinationId> = destinations.into_iter().collect();
        let mut seen = HashSet::new();
        destinations.retain(|d| seen.insert(d.clone()));
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = QueueItemId(inner.next_id);
            inner.items.insert(id, QueueItem::new(id, file, destinations));
            id
        };
        tracing::debug!(item = %id, file = %file.display(), "Enqueued file");
        self.bump();
        id
    }

    /// Move a pending item to running. Returns `false` (and changes nothing)
    /// for unknown items or items that aren't pending.
    pub fn mark_running(&self, id: QueueItemId) -> bool {
        let changed = {
            let mut inner = self.lock();
            match inner.items.get_mut(&id) {
                Some(item) if item.status == QueueStatus::Pending => {
                    item.status = QueueStatus::Running;
                    item.touch();
                    true
                },
                _ => false,
            }
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Queue a progress event for the next flush.
    ///
    /// Dropped immediately when the item is unknown or terminal, or when the
    /// event's destination isn't one of the item's.
    pub fn queue_progress(&self, id: QueueItemId, event: ProgressEvent) {
        let mut inner = self.lock();
        let accepted = match inner.items.get(&id) {
            Some(item) => !item.is_terminal() && item.progress.contains_key(&event.destination),
            None => false,
        };
        if accepted {
            inner.pending.entry(id).or_default().push(event);
        } else {
            tracing::debug!(item = %id, destination = %event.destination, "Dropped stale progress event");
        }
    }

    /// Apply all pending updates. Returns the number of items that changed.
    #[instrument(level = "trace", skip(self))]
    pub fn flush(&self) -> usize {
        let applied = {
            let mut inner = self.lock();
            let Inner { items, pending, .. } = &mut *inner;
            let mut applied = 0;
            for (id, update) in pending.drain() {
                let Some(item) = items.get_mut(&id) else {
                    continue;
                };
                if item.is_terminal() {
                    tracing::debug!(item = %id, status = %item.status, "Skipped pending update for finished item");
                    continue;
                }
                if update.apply(item) {
                    if item.status == QueueStatus::Pending {
                        item.status = QueueStatus::Running;
                    }
                    item.touch();
                    applied += 1;
                }
            }
            applied
        };
        if applied > 0 {
            tracing::debug!(items = applied, "Flushed queued progress");
            self.bump();
        }
        applied
    }

    /// Finish an item successfully. Clears any pending update for it in the
    /// same step. Returns `false` for unknown or already terminal items.
    pub fn mark_success(&self, id: QueueItemId, primary_url: impl Into<String>) -> bool {
        let primary_url = primary_url.into();
        self.finish(id, |item| {
            item.status = QueueStatus::Success;
            item.primary_url = Some(primary_url);
            item.error = None;
        })
    }

    /// Finish an item with an error. Clears any pending update for it in the
    /// same step. Returns `false` for unknown or already terminal items.
    pub fn mark_failure(&self, id: QueueItemId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.finish(id, |item| {
            item.status = QueueStatus::Error;
            item.error = Some(error);
        })
    }

    fn finish(&self, id: QueueItemId, terminal: impl FnOnce(&mut QueueItem)) -> bool {
        let changed = {
            let mut inner = self.lock();
            inner.pending.remove(&id);
            match inner.items.get_mut(&id) {
                Some(item) if !item.is_terminal() => {
                    terminal(item);
                    item.touch();
                    true
                },
                _ => false,
            }
        };
        if changed {
            self.bump();
        }
        changed
    }

    /// Record one destination's terminal result into its own slot.
    ///
    /// Allowed on terminal items (a backgrounded destination finishing after
    /// the item was decided) but never overwrites a slot that already holds
    /// a result, and never changes the item's status. Returns whether the
    /// slot was written.
    pub fn record_destination_result(&self, id: QueueItemId, result: &DestinationResult) -> bool {
        let changed = {
            let mut inner = self.lock();
            let Inner { items, pending, .. } = &mut *inner;
            match items.get_mut(&id) {
                Some(item) => match item.progress.get_mut(&result.destination) {
                    Some(slot) if !slot.status.is_terminal() => {
                        slot.apply_result(result);
                        item.touch();
                        // Nothing queued for this slot may land on top of the result.
                        if let Some(update) = pending.get_mut(&id) {
                            update.discard(&result.destination);
                        }
                        true
                    },
                    _ => false,
                },
                None => false,
            }
        };
        if changed {
            self.bump();
        } else {
            tracing::debug!(item = %id, destination = %result.destination, "Ignored destination result");
        }
        changed
    }

    /// Put a failed item back to pending: failed slots are cleared, successful
    /// slots are kept, and any pending update is discarded.
    pub fn reset_for_retry(&self, id: QueueItemId) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.pending.remove(&id);
            let item = inner.items.get_mut(&id).ok_or(ErrorKind::ItemNotFound(id))?;
            if item.status != QueueStatus::Error {
                exn::bail!(ErrorKind::ItemNotFailed { item: id, status: item.status });
            }
            for slot in item.progress.values_mut().filter(|slot| slot.status == SlotStatus::Failed) {
                *slot = DestinationProgress::default();
            }
            item.status = QueueStatus::Pending;
            item.error = None;
            item.touch();
        }
        tracing::debug!(item = %id, "Reset item for retry");
        self.bump();
        Ok(())
    }

    /// Clear one failed destination slot so it can be retried on its own.
    ///
    /// If the item as a whole had failed it goes back to pending (and its
    /// pending update is discarded). A successful item keeps its status.
    pub fn reset_destination(&self, id: QueueItemId, destination: &DestinationId) -> Result<()> {
        {
            let mut inner = self.lock();
            let Inner { items, pending, .. } = &mut *inner;
            let item = items.get_mut(&id).ok_or(ErrorKind::ItemNotFound(id))?;
            let slot = item.progress.get_mut(destination).ok_or_else(|| ErrorKind::DestinationNotFound {
                item: id,
                destination: destination.clone(),
            })?;
            if slot.status != SlotStatus::Failed {
                exn::bail!(ErrorKind::DestinationNotFailed {
                    item: id,
                    destination: destination.clone(),
                    status: slot.status,
                });
            }
            *slot = DestinationProgress::default();
            if item.status == QueueStatus::Error {
                pending.remove(&id);
                item.status = QueueStatus::Pending;
                item.error = None;
            }
            item.touch();
        }
        tracing::debug!(item = %id, destination = %destination, "Reset destination for retry");
        self.bump();
        Ok(())
    }

    pub fn remove(&self, id: QueueItemId) -> Option<QueueItem> {
        let removed = {
            let mut inner = self.lock();
            inner.pending.remove(&id);
            inner.items.remove(&id)
        };
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Remove every item.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.items.clear();
            inner.pending.clear();
        }
        self.bump();
    }

    /// Remove items that reached a terminal status. Returns how many.
    pub fn clear_finished(&self) -> usize {
        let removed = {
            let mut inner = self.lock();
            let before = inner.items.len();
            inner.items.retain(|_, item| !item.is_terminal());
            before - inner.items.len()
        };
        if removed > 0 {
            self.bump();
        }
        removed
    }

    pub fn get(&self, id: QueueItemId) -> Option<QueueItem> {
        self.lock().items.get(&id).cloned()
    }

    /// Every item, in enqueue order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.lock().items.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Revision counter, bumped on every change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// The current snapshot, then a new one after every change.
    ///
    /// Changes landing in quick succession may be observed as one snapshot.
    pub fn snapshots(&self) -> impl Stream<Item = Vec<QueueItem>> + Send + 'static {
        let store = self.clone();
        let mut changes = self.changes();
        async_stream::stream! {
            loop {
                changes.borrow_and_update();
                yield store.snapshot();
                if changes.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_destination::{ErrorDescriptor, FailureCode, UploadReceipt};
    use futures::StreamExt;
    use rstest::rstest;

    fn event(destination: &str, percent: u8) -> ProgressEvent {
        ProgressEvent {
            destination: destination.into(),
            percent,
            step: "uploading".to_string(),
            step_index: 2,
            total_steps: 3,
        }
    }

    fn success(destination: &str) -> DestinationResult {
        DestinationResult::success(destination.into(), UploadReceipt::new(format!("https://{destination}/1.png"), 4))
    }

    fn failure(destination: &str) -> DestinationResult {
        DestinationResult::failure(destination.into(), ErrorDescriptor::new(FailureCode::Network, "reset", true))
    }

    fn store_with_item() -> (QueueStore, QueueItemId) {
        let store = QueueStore::new();
        let id = store.enqueue(Path::new("/tmp/cat.png"), ["smms".into(), "weibo".into()]);
        (store, id)
    }

    #[test]
    fn test_enqueue_assigns_increasing_ids() {
        let store = QueueStore::new();
        let first = store.enqueue(Path::new("a.png"), ["smms".into()]);
        let second = store.enqueue(Path::new("b.png"), ["smms".into(), "smms".into()]);
        assert!(second > first);
        assert_eq!(store.get(second).unwrap().destinations.len(), 1);
        let names: Vec<_> = store.snapshot().into_iter().map(|item| item.file_name).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_progress_is_coalesced_until_flush() {
        let (store, id) = store_with_item();
        store.queue_progress(id, event("smms", 10));
        store.queue_progress(id, event("smms", 45));
        assert_eq!(store.get(id).unwrap().progress["smms"].percent, 0);

        assert_eq!(store.flush(), 1);
        let item = store.get(id).unwrap();
        assert_eq!(item.status, QueueStatus::Running);
        assert_eq!(item.progress["smms"].percent, 45);
        assert_eq!(item.progress["smms"].status, SlotStatus::Uploading);
        // Nothing left to apply.
        assert_eq!(store.flush(), 0);
    }

    #[rstest]
    #[case::success(true)]
    #[case::failure(false)]
    fn test_terminal_write_discards_pending_update(#[case] succeeded: bool) {
        let (store, id) = store_with_item();
        store.mark_running(id);
        store.queue_progress(id, event("smms", 80));
        match succeeded {
            true => assert!(store.mark_success(id, "https://smms/1.png")),
            false => assert!(store.mark_failure(id, "all destinations failed")),
        }
        let terminal = store.get(id).unwrap();

        assert_eq!(store.flush(), 0);
        assert_eq!(store.get(id).unwrap(), terminal);
    }

    #[rstest]
    #[case::success(true)]
    #[case::failure(false)]
    fn test_terminal_write_removes_pending_entry(#[case] succeeded: bool) {
        let (store, id) = store_with_item();
        store.mark_running(id);
        store.queue_progress(id, event("smms", 80));
        assert!(store.lock().pending.contains_key(&id));

        match succeeded {
            true => assert!(store.mark_success(id, "https://smms/1.png")),
            false => assert!(store.mark_failure(id, "all destinations failed")),
        }
        assert!(!store.lock().pending.contains_key(&id));
    }

    #[rstest]
    #[case::success(true)]
    #[case::failure(false)]
    fn test_flush_skips_update_queued_for_terminal_item(#[case] succeeded: bool) {
        let (store, id) = store_with_item();
        store.mark_running(id);
        match succeeded {
            true => assert!(store.mark_success(id, "https://smms/1.png")),
            false => assert!(store.mark_failure(id, "all destinations failed")),
        }
        let terminal = store.get(id).unwrap();

        // Slip an update in behind the terminal write, past `queue_progress`.
        let mut update = PendingUpdate::default();
        update.push(event("smms", 60));
        update.push(event("weibo", 30));
        store.lock().pending.insert(id, update);

        assert_eq!(store.flush(), 0);
        let after = store.get(id).unwrap();
        assert_eq!(after.status, terminal.status);
        assert_eq!(after.progress, terminal.progress);
        assert!(store.lock().pending.is_empty());
    }

    #[test]
    fn test_progress_after_terminal_write_never_applies() {
        let (store, id) = store_with_item();
        store.mark_running(id);
        store.queue_progress(id, event("weibo", 20));
        store.flush();
        assert!(store.mark_failure(id, "weibo: cookie expired"));
        let terminal = store.get(id).unwrap();

        // A late event from an adapter that hadn't noticed yet.
        store.queue_progress(id, event("weibo", 60));
        store.queue_progress(id, event("smms", 90));
        assert_eq!(store.flush(), 0);
        let after = store.get(id).unwrap();
        assert_eq!(after.status, QueueStatus::Error);
        assert_eq!(after.progress, terminal.progress);
    }

    #[test]
    fn test_terminal_state_is_not_overwritten() {
        let (store, id) = store_with_item();
        assert!(store.mark_failure(id, "boom"));
        assert!(!store.mark_success(id, "https://late"));
        assert!(!store.mark_running(id));
        let item = store.get(id).unwrap();
        assert_eq!(item.status, QueueStatus::Error);
        assert_eq!(item.primary_url, None);
    }

    #[test]
    fn test_destination_result_on_terminal_item_writes_only_its_slot() {
        let (store, id) = store_with_item();
        assert!(store.record_destination_result(id, &success("smms")));
        assert!(store.mark_success(id, "https://smms/1.png"));

        // Backgrounded destination finishing later.
        assert!(store.record_destination_result(id, &failure("weibo")));
        let item = store.get(id).unwrap();
        assert_eq!(item.status, QueueStatus::Success);
        assert_eq!(item.progress["weibo"].status, SlotStatus::Failed);
        assert_eq!(item.progress["smms"].status, SlotStatus::Success);

        // Slots hold their first result.
        assert!(!store.record_destination_result(id, &success("weibo")));
        assert_eq!(store.get(id).unwrap().progress["weibo"].status, SlotStatus::Failed);
    }

    #[test]
    fn test_destination_result_discards_queued_progress_for_slot() {
        let (store, id) = store_with_item();
        store.mark_running(id);
        store.queue_progress(id, event("smms", 50));
        store.queue_progress(id, event("weibo", 10));
        store.record_destination_result(id, &success("smms"));
        store.flush();
        let item = store.get(id).unwrap();
        assert_eq!(item.progress["smms"].status, SlotStatus::Success);
        assert_eq!(item.progress["smms"].percent, 100);
        assert_eq!(item.progress["weibo"].percent, 10);
    }

    #[test]
    fn test_progress_for_unknown_destination_is_dropped() {
        let (store, id) = store_with_item();
        store.queue_progress(id, event("github", 50));
        store.queue_progress(QueueItemId(999), event("smms", 50));
        assert_eq!(store.flush(), 0);
    }

    #[test]
    fn test_reset_for_retry() {
        let (store, id) = store_with_item();
        store.record_destination_result(id, &failure("smms"));
        store.record_destination_result(id, &failure("weibo"));
        store.mark_failure(id, "total failure");

        store.reset_for_retry(id).unwrap();
        let item = store.get(id).unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.error, None);
        assert!(item.progress.values().all(|slot| *slot == DestinationProgress::default()));

        let err = store.reset_for_retry(id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ItemNotFailed { status: QueueStatus::Pending, .. }));
        let err = store.reset_for_retry(QueueItemId(999)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ItemNotFound(_)));
    }

    #[test]
    fn test_reset_destination_keeps_other_slots() {
        let (store, id) = store_with_item();
        store.record_destination_result(id, &success("smms"));
        store.record_destination_result(id, &failure("weibo"));
        store.mark_success(id, "https://smms/1.png");

        let err = store.reset_destination(id, &"smms".into()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::DestinationNotFailed { .. }));

        store.reset_destination(id, &"weibo".into()).unwrap();
        let item = store.get(id).unwrap();
        assert_eq!(item.status, QueueStatus::Success);
        assert_eq!(item.progress["smms"].status, SlotStatus::Success);
        assert_eq!(item.progress["weibo"], DestinationProgress::default());
        assert!(store.record_destination_result(id, &success("weibo")));
    }

    #[test]
    fn test_reset_destination_reopens_failed_item() {
        let (store, id) = store_with_item();
        store.record_destination_result(id, &failure("smms"));
        store.mark_failure(id, "total failure");
        store.reset_destination(id, &"smms".into()).unwrap();
        assert_eq!(store.get(id).unwrap().status, QueueStatus::Pending);
        assert!(store.mark_running(id));
    }

    #[test]
    fn test_housekeeping() {
        let store = QueueStore::new();
        let done = store.enqueue(Path::new("a.png"), ["smms".into()]);
        let failed = store.enqueue(Path::new("b.png"), ["smms".into()]);
        let running = store.enqueue(Path::new("c.png"), ["smms".into()]);
        store.mark_success(done, "https://a");
        store.mark_failure(failed, "nope");
        store.mark_running(running);

        assert_eq!(store.clear_finished(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.remove(running).is_some());
        assert!(store.remove(running).is_none());
        store.enqueue(Path::new("d.png"), ["smms".into()]);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_changes_bump_revision() {
        let (store, id) = store_with_item();
        let changes = store.changes();
        let start = *changes.borrow();
        store.queue_progress(id, event("smms", 10));
        assert_eq!(*changes.borrow(), start);
        store.flush();
        assert_eq!(*changes.borrow(), start + 1);
        store.mark_success(id, "https://smms/1.png");
        assert_eq!(*changes.borrow(), start + 2);
    }

    #[tokio::test]
    async fn test_snapshots_stream() {
        let store = QueueStore::new();
        let mut snapshots = Box::pin(store.snapshots());
        assert!(snapshots.next().await.unwrap().is_empty());
        let id = store.enqueue(Path::new("a.png"), ["smms".into()]);
        let snapshot = snapshots.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
    }
}
