//! The orchestrator.

use crate::eligibility::{self, Rejection};
use crate::error::{ErrorKind, FailureList, RejectionList, Result};
use crate::policy::{Lane, LaunchPolicy};
use exn::ResultExt;
use fanout_destination::error::ErrorKind as DestinationErrorKind;
use fanout_destination::{
    AdapterHandle, DestinationId, DestinationRegistry, DestinationResult, DestinationSettings, ErrorDescriptor,
    ProgressEvent, ProgressRouter, ProgressSink,
};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::instrument;

/// Receives every destination's result, exactly once per destination.
pub type ResultCallback = Arc<dyn Fn(DestinationResult) + Send + Sync>;

/// Optional observers of one orchestration run.
#[derive(Clone, Default)]
pub struct UploadHooks {
    pub(crate) on_progress: Option<ProgressSink>,
    pub(crate) on_result: Option<ResultCallback>,
}
impl UploadHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every progress report of every destination, tagged with
    /// the destination it came from.
    pub fn on_progress(mut self, callback: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Called once per attempted destination when it finishes, including
    /// destinations still running in the background after
    /// [`Uploader::upload()`] returned. Calls are made in completion order.
    pub fn on_result(mut self, callback: impl Fn(DestinationResult) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(callback));
        self
    }
}
impl fmt::Debug for UploadHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHooks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_result", &self.on_result.is_some())
            .finish()
    }
}

/// A destination that was attempted and failed before the outcome was
/// decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailure {
    pub destination: DestinationId,
    pub error: ErrorDescriptor,
}

/// Combined result of one orchestration run. Serializable as the history
/// record of the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedOutcome {
    /// First destination to succeed.
    pub primary: DestinationId,
    pub primary_url: String,
    /// Every result that arrived before the outcome was decided, in
    /// completion order.
    pub results: Vec<DestinationResult>,
    pub partial_failures: Vec<PartialFailure>,
    /// Slow destinations still running when the outcome was decided. Their
    /// results only reach [`UploadHooks::on_result`].
    pub backgrounded: Vec<DestinationId>,
    /// Requested destinations that were never attempted.
    pub rejected: Vec<Rejection>,
}
impl CombinedOutcome {
    pub fn is_partial_success(&self) -> bool {
        !self.partial_failures.is_empty()
    }

    pub fn primary_result(&self) -> Option<&DestinationResult> {
        self.results.iter().find(|result| result.destination == self.primary)
    }
}

/// Pushes one file to many destinations at once.
///
/// # Examples
///
/// ```no_run
/// use fanout_destination::adapter::LocalDirectoryAdapter;
/// use fanout_destination::{DestinationRegistry, DestinationSettings};
/// use fanout_upload::{LaunchPolicy, UploadHooks, Uploader};
/// use serde_json::json;
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # async fn example() -> fanout_upload::error::Result<()> {
/// let registry = DestinationRegistry::new()
///     .with(Arc::new(LocalDirectoryAdapter::new("nas")))
///     .with(Arc::new(LocalDirectoryAdapter::new("usb")));
/// let settings = DestinationSettings::new()
///     .with("nas", json!({"directory": "/mnt/nas/uploads"}))
///     .with("usb", json!({"directory": "/media/usb/uploads"}));
/// let uploader = Uploader::new(registry).with_policy(LaunchPolicy::new(["usb"]));
///
/// let hooks = UploadHooks::new().on_result(|result| println!("{} finished", result.destination));
/// let outcome =
///     uploader.upload(Path::new("/tmp/cat.png"), &["nas".into(), "usb".into()], &settings, hooks).await?;
/// println!("{}", outcome.primary_url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Uploader {
    registry: Arc<DestinationRegistry>,
    policy: LaunchPolicy,
}

impl Uploader {
    pub fn new(registry: impl Into<Arc<DestinationRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            policy: LaunchPolicy::all_fast(),
        }
    }

    pub fn with_policy(mut self, policy: LaunchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &LaunchPolicy {
        &self.policy
    }

    /// Upload `file` to every eligible destination in `destinations`.
    ///
    /// Destinations that aren't registered, aren't fully configured or fail
    /// their adapter's validation are skipped (and listed in
    /// [`CombinedOutcome::rejected`]). Everything else is launched at once.
    ///
    /// Returns once every fast destination has finished and at least one
    /// destination has succeeded. Without any success by then, it also waits
    /// for the slow destinations. Slow destinations still running at that
    /// point keep running in the background and report only through
    /// [`UploadHooks::on_result`].
    ///
    /// # Errors
    /// - [`ErrorKind::NoDestinationsSelected`] if `destinations` is empty.
    /// - [`ErrorKind::NoConfiguredDestination`] if none are eligible.
    /// - [`ErrorKind::UnreadableFile`] if `file` isn't a readable file.
    /// - [`ErrorKind::TotalFailure`] if every attempted destination failed.
    pub async fn upload(
        &self,
        file: &Path,
        destinations: &[DestinationId],
        settings: &DestinationSettings,
        hooks: UploadHooks,
    ) -> Result<CombinedOutcome> {
        if destinations.is_empty() {
            exn::bail!(ErrorKind::NoDestinationsSelected);
        }
        let (eligible, rejected) = eligibility::partition(&self.registry, destinations, settings);
        if eligible.is_empty() {
            exn::bail!(ErrorKind::NoConfiguredDestination(RejectionList(rejected)));
        }
        ensure_readable(file).await?;

        let started = Instant::now();
        let (fast, slow) = self.policy.split(eligible);
        tracing::info!(
            file = %file.display(),
            fast = fast.len(),
            slow = slow.len(),
            skipped = rejected.len(),
            "Starting upload"
        );

        let router = hooks.on_progress.clone().map(ProgressRouter::new).unwrap_or_default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut running: HashSet<DestinationId> = HashSet::new();
        for (lane, adapter) in fast.iter().map(|a| (Lane::Fast, a)).chain(slow.iter().map(|a| (Lane::Slow, a))) {
            running.insert(adapter.id().clone());
            launch(lane, Arc::clone(adapter), file, settings.get(adapter.id().as_str()).cloned(), &router, &tx);
        }
        // Only the destination tasks hold senders now; the channel closes
        // once they have all reported.
        drop(tx);

        let mut fast_remaining = fast.len();
        let mut await_slow = fast.is_empty();
        let mut results: Vec<DestinationResult> = Vec::new();
        let mut primary: Option<usize> = None;
        while !running.is_empty() {
            if fast_remaining == 0 {
                if !await_slow && primary.is_some() {
                    break;
                }
                await_slow = true;
            }
            let Some((lane, result)) = rx.recv().await else {
                break;
            };
            if lane == Lane::Fast {
                fast_remaining -= 1;
            }
            running.remove(&result.destination);
            if primary.is_none() && result.is_success() {
                primary = Some(results.len());
            }
            if let Some(on_result) = &hooks.on_result {
                on_result(result.clone());
            }
            results.push(result);
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Some(primary) = primary.map(|index| &results[index]) else {
            tracing::warn!(file = %file.display(), elapsed_ms, "Upload failed on every destination");
            exn::bail!(ErrorKind::TotalFailure(FailureList::from_results(&results)));
        };
        let primary_id = primary.destination.clone();
        let primary_url = primary.url().map(str::to_string).unwrap_or_default();

        // Keep slow order stable (launch order) rather than set order.
        let backgrounded: Vec<DestinationId> =
            slow.iter().map(|adapter| adapter.id().clone()).filter(|id| running.contains(id)).collect();
        if !backgrounded.is_empty() {
            tracing::info!(destinations = ?backgrounded, "Continuing slow destinations in the background");
            forward_background(rx, hooks.on_result.clone());
        }

        let partial_failures: Vec<PartialFailure> = results
            .iter()
            .filter_map(|result| {
                result.error().map(|error| PartialFailure {
                    destination: result.destination.clone(),
                    error: error.clone(),
                })
            })
            .collect();
        tracing::info!(
            file = %file.display(),
            primary = %primary_id,
            elapsed_ms,
            failed = partial_failures.len(),
            backgrounded = backgrounded.len(),
            "Upload decided"
        );

        Ok(CombinedOutcome {
            primary: primary_id,
            primary_url,
            results,
            partial_failures,
            backgrounded,
            rejected,
        })
    }

    /// Upload `file` to a single destination again.
    ///
    /// Runs the same eligibility checks as [`upload()`](Self::upload) and
    /// touches no other destination. The upload itself failing is not an
    /// error: it is returned as a failed [`DestinationResult`].
    #[instrument(skip(self, file, settings, on_progress), fields(file = %file.display()))]
    pub async fn retry(
        &self,
        file: &Path,
        destination: &DestinationId,
        settings: &DestinationSettings,
        on_progress: Option<ProgressSink>,
    ) -> Result<DestinationResult> {
        let adapter = eligibility::check(&self.registry, destination, settings).map_err(|rejection| {
            tracing::warn!(destination = %destination, reason = %rejection.reason, "Cannot retry destination");
            ErrorKind::NoConfiguredDestination(RejectionList(vec![rejection]))
        })?;
        ensure_readable(file).await?;
        tracing::info!(file = %file.display(), destination = %destination, "Retrying upload");
        let router = on_progress.map(ProgressRouter::new).unwrap_or_default();
        Ok(run_destination(adapter, file, settings.get(destination.as_str()), &router).await)
    }
}

async fn ensure_readable(file: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(file).await.or_raise(|| ErrorKind::UnreadableFile(file.to_path_buf()))?;
    if !metadata.is_file() {
        exn::bail!(ErrorKind::UnreadableFile(file.to_path_buf()));
    }
    Ok(())
}

fn launch(
    lane: Lane,
    adapter: AdapterHandle,
    file: &Path,
    settings: Option<Value>,
    router: &ProgressRouter,
    tx: &mpsc::UnboundedSender<(Lane, DestinationResult)>,
) {
    let file: PathBuf = file.to_path_buf();
    let router = router.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = run_destination(adapter, &file, settings.as_ref(), &router).await;
        if let Err(unsent) = tx.send((lane, result)) {
            let (_, result) = unsent.0;
            tracing::warn!(destination = %result.destination, "Destination finished after its result channel closed");
        }
    });
}

/// Run one adapter to completion. Never fails: errors and panics become a
/// failed result.
async fn run_destination(
    adapter: AdapterHandle,
    file: &Path,
    settings: Option<&Value>,
    router: &ProgressRouter,
) -> DestinationResult {
    let destination = adapter.id().clone();
    let reporter = router.reporter(destination.clone());
    let started = Instant::now();
    let upload = AssertUnwindSafe(adapter.upload(file, settings, &reporter)).catch_unwind().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let error = match upload {
        Ok(Ok(receipt)) => {
            tracing::info!(destination = %destination, elapsed_ms, url = %receipt.url, "Destination succeeded");
            return DestinationResult::success(destination, receipt);
        },
        Ok(Err(err)) => err.descriptor(),
        Err(panic) => DestinationErrorKind::Panicked(panic_message(panic.as_ref())).descriptor(),
    };
    tracing::warn!(destination = %destination, elapsed_ms, reason = %error, "Destination failed");
    DestinationResult::failure(destination, error)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn forward_background(mut rx: mpsc::UnboundedReceiver<(Lane, DestinationResult)>, on_result: Option<ResultCallback>) {
    tokio::spawn(async move {
        while let Some((_, result)) = rx.recv().await {
            tracing::info!(
                destination = %result.destination,
                success = result.is_success(),
                "Background destination finished"
            );
            if let Some(on_result) = &on_result {
                on_result(result);
            }
        }
    });
}
