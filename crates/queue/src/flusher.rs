//! Periodic flush task.

use crate::store::QueueStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Handle to a running flusher. The task stops when the handle is dropped.
#[derive(Debug)]
pub struct FlusherHandle {
    handle: JoinHandle<()>,
}
impl FlusherHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop flushing. Progress queued after this is only applied by manual
    /// [`QueueStore::flush()`] calls.
    pub fn stop(self) {
        self.handle.abort();
    }
}
impl Drop for FlusherHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Shortest tick the flusher runs at.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Spawn a task that calls [`QueueStore::flush()`] every `every`.
///
/// `every` is raised to [`MIN_FLUSH_INTERVAL`] if shorter. Missed ticks are
/// skipped rather than bunched up: a late flush already applies everything
/// queued in the meantime. Must be called from within a Tokio runtime.
pub fn spawn_flusher(store: QueueStore, every: Duration) -> FlusherHandle {
    let every = every.max(MIN_FLUSH_INTERVAL);
    tracing::debug!(interval_ms = every.as_millis() as u64, "Starting queue flusher");
    let handle = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            store.flush();
        }
    });
    FlusherHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_destination::ProgressEvent;
    use std::path::Path;

    fn event(percent: u8) -> ProgressEvent {
        ProgressEvent {
            destination: "smms".into(),
            percent,
            step: "uploading".to_string(),
            step_index: 1,
            total_steps: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_tick() {
        let store = QueueStore::new();
        let id = store.enqueue(Path::new("a.png"), ["smms".into()]);
        let flusher = spawn_flusher(store.clone(), Duration::from_millis(100));
        // Let the immediate first tick pass.
        tokio::time::sleep(Duration::from_millis(1)).await;

        store.queue_progress(id, event(40));
        store.queue_progress(id, event(70));
        assert_eq!(store.get(id).unwrap().progress["smms"].percent, 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(id).unwrap().progress["smms"].percent, 70);
        assert!(flusher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let store = QueueStore::new();
        let id = store.enqueue(Path::new("a.png"), ["smms".into()]);
        let flusher = spawn_flusher(store.clone(), Duration::ZERO);

        store.queue_progress(id, event(55));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(flusher.is_running());
        assert_eq!(store.get(id).unwrap().progress["smms"].percent, 55);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_dropped() {
        let store = QueueStore::new();
        let id = store.enqueue(Path::new("a.png"), ["smms".into()]);
        spawn_flusher(store.clone(), Duration::from_millis(100)).stop();

        store.queue_progress(id, event(40));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.get(id).unwrap().progress["smms"].percent, 0);
    }
}
