//! Progress routing.
//!
//! Adapters report progress through a [`ProgressReporter`] without knowing
//! which destination they are, who is listening, or how many other uploads
//! are running. The [`ProgressRouter`] hands out one reporter per destination
//! and every event leaving a reporter is tagged with that destination's id,
//! so concurrent streams can't get crossed.
//!
//! # Ordering
//! Events from one reporter reach the sink in the order they were reported
//! (the sink is invoked while holding the reporter's step lock). Nothing is
//! promised about ordering *between* destinations. Percentages are passed
//! through as reported: adapters that retry internally may go backwards.

use crate::models::DestinationId;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A single progress report, tagged with the destination it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub destination: DestinationId,
    /// 0 to 100 inclusive
    pub percent: u8,
    pub step: String,
    /// 1-based; 0 while the adapter hasn't announced any step
    pub step_index: u32,
    pub total_steps: u32,
}

/// Receives progress events. Must be cheap: it runs on the adapter's task.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Hands out destination-tagged [`ProgressReporter`]s that all feed the same
/// sink.
#[derive(Clone, Default)]
pub struct ProgressRouter {
    sink: Option<ProgressSink>,
}
impl ProgressRouter {
    pub fn new(sink: ProgressSink) -> Self {
        Self { sink: Some(sink) }
    }

    /// A router that discards everything.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn reporter(&self, destination: DestinationId) -> ProgressReporter {
        ProgressReporter {
            destination,
            sink: self.sink.clone(),
            step: Arc::new(Mutex::new(Step::default())),
        }
    }
}
impl fmt::Debug for ProgressRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressRouter").field("sink", &self.sink.is_some()).finish()
    }
}

#[derive(Debug, Default)]
struct Step {
    label: String,
    index: u32,
    total: u32,
}

/// Progress handle given to an adapter for the duration of one upload.
#[derive(Clone)]
pub struct ProgressReporter {
    destination: DestinationId,
    sink: Option<ProgressSink>,
    step: Arc<Mutex<Step>>,
}
impl ProgressReporter {
    /// A reporter not attached to any sink.
    pub fn detached(destination: DestinationId) -> Self {
        ProgressRouter::silent().reporter(destination)
    }

    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    /// Announce the start of step `index` of `total`.
    pub fn step(&self, index: u32, total: u32, percent: u8, label: impl Into<String>) {
        let mut step = self.step.lock().unwrap_or_else(PoisonError::into_inner);
        step.label = label.into();
        step.index = index;
        step.total = total;
        self.emit(&step, percent);
    }

    /// Report a new percentage within the current step.
    pub fn percent(&self, percent: u8) {
        let step = self.step.lock().unwrap_or_else(PoisonError::into_inner);
        self.emit(&step, percent);
    }

    /// Report byte-level transfer progress, converted to a percentage.
    pub fn transfer(&self, sent: u64, total: u64) {
        let percent = match total {
            0 => 100,
            // Clamped to 100 so the cast can't truncate.
            _ => (sent.saturating_mul(100) / total).min(100) as u8,
        };
        self.percent(percent);
    }

    fn emit(&self, step: &Step, percent: u8) {
        let Some(sink) = &self.sink else {
            return;
        };
        sink(ProgressEvent {
            destination: self.destination.clone(),
            percent: percent.min(100),
            step: step.label.clone(),
            step_index: step.index,
            total_steps: step.total,
        });
    }
}
impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").field("destination", &self.destination).finish_non_exhaustive()
    }
}
