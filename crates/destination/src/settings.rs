//! Per-destination settings.
//!
//! Settings are opaque to everything except the adapter they belong to. The
//! only thing the rest of the system knows about them is the generic
//! completeness rule: a destination that declares required fields needs a
//! settings object in which each of those fields is present and non-empty.

use crate::error::{ErrorKind, Result};
use crate::models::DestinationId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Mapping of destination id to that destination's (opaque) settings object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationSettings(HashMap<DestinationId, Value>);
impl DestinationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    pub fn insert(&mut self, id: impl Into<DestinationId>, settings: Value) -> Option<Value> {
        self.0.insert(id.into(), settings)
    }

    pub fn with(mut self, id: impl Into<DestinationId>, settings: Value) -> Self {
        self.insert(id, settings);
        self
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        self.0.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &DestinationId> {
        self.0.keys()
    }
}
impl FromIterator<(DestinationId, Value)> for DestinationSettings {
    fn from_iter<T: IntoIterator<Item = (DestinationId, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of checking a settings object against a list of required fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    /// Every required field is present (or nothing was required).
    Complete,
    /// Fields are required but there is no settings object at all.
    NotConfigured,
    /// A settings object exists but these required fields are absent or empty.
    MissingFields(Vec<&'static str>),
}

/// Check a settings object against the fields a destination requires.
///
/// A field counts as missing when it is absent, `null`, or a string that is
/// empty after trimming. Destinations requiring nothing are always complete,
/// even without a settings object.
pub fn completeness(settings: Option<&Value>, required: &[&'static str]) -> Completeness {
    if required.is_empty() {
        return Completeness::Complete;
    }
    let Some(object) = settings.and_then(Value::as_object) else {
        return Completeness::NotConfigured;
    };
    let missing: Vec<_> = required.iter().copied().filter(|field| !is_present(object, field)).collect();
    match missing.is_empty() {
        true => Completeness::Complete,
        false => Completeness::MissingFields(missing),
    }
}

fn is_present(object: &Map<String, Value>, field: &str) -> bool {
    match object.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Read an optional string field, treating blank strings as absent.
pub fn optional_str<'a>(settings: Option<&'a Value>, field: &str) -> Option<&'a str> {
    settings.and_then(|s| s.get(field)).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// Read a string field that the adapter cannot work without.
pub fn required_str<'a>(settings: Option<&'a Value>, field: &str) -> Result<&'a str> {
    match optional_str(settings, field) {
        Some(value) => Ok(value),
        None => exn::bail!(ErrorKind::Config(format!("missing field `{field}`"))),
    }
}
