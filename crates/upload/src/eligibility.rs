//! Which requested destinations get attempted.

use fanout_destination::{
    AdapterHandle, Completeness, DestinationId, DestinationRegistry, DestinationSettings, completeness,
};
use serde::Serialize;
use std::fmt;

/// Why a requested destination was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "details", rename_all = "snake_case")]
pub enum RejectionReason {
    /// No adapter is registered under this id.
    Unknown,
    /// Settings are required but the destination has none.
    NotConfigured,
    MissingFields(Vec<&'static str>),
    /// The adapter's own validation refused the settings.
    Invalid(Vec<String>),
}
impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("not a registered destination"),
            Self::NotConfigured => f.write_str("not configured"),
            Self::MissingFields(fields) => {
                let fields: Vec<_> = fields.iter().map(|field| format!("`{field}`")).collect();
                write!(f, "missing field {}", fields.join(", "))
            },
            Self::Invalid(errors) => write!(f, "invalid settings: {}", errors.join("; ")),
        }
    }
}

/// A requested destination that was filtered out before launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub destination: DestinationId,
    pub reason: RejectionReason,
}
impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.destination, self.reason)
    }
}

/// Look up a destination and check its settings are complete and valid.
pub(crate) fn check(
    registry: &DestinationRegistry,
    destination: &DestinationId,
    settings: &DestinationSettings,
) -> Result<AdapterHandle, Rejection> {
    let reject = |reason| Rejection { destination: destination.clone(), reason };
    let adapter = registry.get(destination.as_str()).ok_or_else(|| reject(RejectionReason::Unknown))?;
    let settings = settings.get(destination.as_str());
    match completeness(settings, adapter.required_fields()) {
        Completeness::Complete => {},
        Completeness::NotConfigured => return Err(reject(RejectionReason::NotConfigured)),
        Completeness::MissingFields(fields) => return Err(reject(RejectionReason::MissingFields(fields))),
    }
    let report = adapter.validate(settings);
    if !report.is_valid() {
        return Err(reject(RejectionReason::Invalid(report.errors)));
    }
    Ok(adapter)
}

/// Split requested destinations into eligible adapters and rejections,
/// keeping request order and ignoring repeated ids.
pub(crate) fn partition(
    registry: &DestinationRegistry,
    requested: &[DestinationId],
    settings: &DestinationSettings,
) -> (Vec<AdapterHandle>, Vec<Rejection>) {
    let mut eligible: Vec<AdapterHandle> = Vec::new();
    let mut rejected: Vec<Rejection> = Vec::new();
    for destination in requested {
        let seen = eligible.iter().any(|adapter| adapter.id() == destination)
            || rejected.iter().any(|rejection| &rejection.destination == destination);
        if seen {
            continue;
        }
        match check(registry, destination, settings) {
            Ok(adapter) => eligible.push(adapter),
            Err(rejection) => {
                tracing::warn!(destination = %destination, reason = %rejection.reason, "Skipping destination");
                rejected.push(rejection);
            },
        }
    }
    (eligible, rejected)
}
