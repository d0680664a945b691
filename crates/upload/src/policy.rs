//! Fast/slow launch policy.

use fanout_destination::{AdapterHandle, DestinationId};
use std::collections::HashSet;

/// Which group a destination was launched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Lane {
    Fast,
    Slow,
}

/// Classifies destinations as fast/reliable or slow/unreliable.
///
/// The orchestrator waits for every fast destination, but only waits for the
/// slow ones when no fast destination succeeded. Everything not listed as
/// background is fast.
///
/// # Examples
///
/// ```
/// use fanout_upload::LaunchPolicy;
///
/// let policy = LaunchPolicy::new(["weibo"]);
/// assert!(policy.is_background("weibo"));
/// assert!(!policy.is_background("r2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchPolicy {
    background: HashSet<DestinationId>,
}
impl LaunchPolicy {
    pub fn new(background: impl IntoIterator<Item = impl Into<DestinationId>>) -> Self {
        Self { background: background.into_iter().map(Into::into).collect() }
    }

    /// Every destination is fast.
    pub fn all_fast() -> Self {
        Self::default()
    }

    pub fn is_background(&self, destination: &str) -> bool {
        self.background.contains(destination)
    }

    pub(crate) fn lane(&self, destination: &DestinationId) -> Lane {
        match self.is_background(destination.as_str()) {
            true => Lane::Slow,
            false => Lane::Fast,
        }
    }

    /// Split adapters into (fast, slow), keeping their relative order.
    pub(crate) fn split(&self, adapters: Vec<AdapterHandle>) -> (Vec<AdapterHandle>, Vec<AdapterHandle>) {
        adapters.into_iter().partition(|adapter| self.lane(adapter.id()) == Lane::Fast)
    }
}
