//! Coalescing of progress events between flushes.

use crate::models::{DestinationProgress, QueueItem, SlotStatus};
use fanout_destination::{DestinationId, ProgressEvent};
use std::collections::BTreeMap;

/// Latest unapplied progress for one destination slot.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotUpdate {
    percent: u8,
    step: String,
}

/// Progress queued for one item since the last flush.
///
/// Only the latest event per destination survives: a burst of fifty progress
/// reports between two ticks becomes a single write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PendingUpdate {
    slots: BTreeMap<DestinationId, SlotUpdate>,
}
impl PendingUpdate {
    pub(crate) fn push(&mut self, event: ProgressEvent) {
        self.slots.insert(event.destination, SlotUpdate { percent: event.percent, step: event.step });
    }

    pub(crate) fn discard(&mut self, destination: &DestinationId) {
        self.slots.remove(destination);
    }

    /// Write the queued progress into `item`, skipping slots that have
    /// already reached a terminal status. Returns whether anything changed.
    ///
    /// Callers must not apply updates to terminal items.
    pub(crate) fn apply(self, item: &mut QueueItem) -> bool {
        let mut changed = false;
        for (destination, update) in self.slots {
            let Some(slot) = item.progress.get_mut(&destination) else {
                continue;
            };
            if slot.status.is_terminal() {
                tracing::debug!(item = %item.id, destination = %destination, "Dropped progress for finished slot");
                continue;
            }
            let next = DestinationProgress {
                status: SlotStatus::Uploading,
                percent: update.percent,
                step: Some(update.step),
                url: None,
                error: None,
            };
            if *slot != next {
                *slot = next;
                changed = true;
            }
        }
        changed
    }
}
