//! Scripted destination for testing.

use crate::adapter::DestinationAdapter;
use crate::error::{ErrorKind, Result};
use crate::models::{DestinationId, UploadReceipt};
use crate::progress::ProgressReporter;
use crate::source::file_name;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed,
    Fail(String),
    Reject(String),
    FailFirst(usize, String),
    Panic,
}

/// Destination whose outcome, latency and settings contract are scripted by
/// the test.
///
/// Waits are done with [`tokio::time::sleep`], so tests running on a paused
/// clock (`#[tokio::test(start_paused = true)]`) control exactly when each
/// mock finishes.
#[derive(Debug)]
pub struct MockDestination {
    id: DestinationId,
    behaviour: Behaviour,
    delay: Duration,
    steps: u32,
    required: &'static [&'static str],
    calls: AtomicUsize,
}

impl MockDestination {
    /// A destination that succeeds immediately.
    pub fn new(id: impl Into<DestinationId>) -> Self {
        Self {
            id: id.into(),
            behaviour: Behaviour::Succeed,
            delay: Duration::ZERO,
            steps: 1,
            required: &[],
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every upload with a (retryable) network error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.behaviour = Behaviour::Fail(message.into());
        self
    }

    /// Fail every upload with a non-retryable rejection.
    pub fn rejecting(mut self, message: impl Into<String>) -> Self {
        self.behaviour = Behaviour::Reject(message.into());
        self
    }

    /// Fail the first `attempts` uploads with a network error, then succeed.
    pub fn failing_first(mut self, attempts: usize, message: impl Into<String>) -> Self {
        self.behaviour = Behaviour::FailFirst(attempts, message.into());
        self
    }

    /// Panic mid-upload.
    pub fn panicking(mut self) -> Self {
        self.behaviour = Behaviour::Panic;
        self
    }

    /// Take this long (spread evenly over the steps) before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_required_fields(mut self, fields: &'static [&'static str]) -> Self {
        self.required = fields;
        self
    }

    /// Number of progress steps announced per upload. At least one.
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// How many times `upload()` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationAdapter for MockDestination {
    fn id(&self) -> &DestinationId {
        &self.id
    }

    fn required_fields(&self) -> &[&'static str] {
        self.required
    }

    async fn upload(
        &self,
        file: &Path,
        _settings: Option<&Value>,
        progress: &ProgressReporter,
    ) -> Result<UploadReceipt> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        let pause = self.delay / self.steps;
        for index in 1..=self.steps {
            let percent = ((index - 1) * 100 / self.steps) as u8;
            progress.step(index, self.steps, percent, format!("step {index}"));
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        match &self.behaviour {
            Behaviour::Fail(message) => exn::bail!(ErrorKind::Network(message.clone())),
            Behaviour::Reject(message) => exn::bail!(ErrorKind::Rejected(message.clone())),
            Behaviour::FailFirst(attempts, message) if attempt < *attempts => {
                exn::bail!(ErrorKind::Network(message.clone()))
            },
            Behaviour::Panic => panic!("mock destination {} panicked", self.id),
            Behaviour::Succeed | Behaviour::FailFirst(..) => {},
        }

        let size = tokio::fs::metadata(file).await.map_err(|e| ErrorKind::io(e, file))?.len();
        progress.percent(100);
        Ok(UploadReceipt::new(format!("mock://{}/{}", self.id, file_name(file)?), size))
    }
}
