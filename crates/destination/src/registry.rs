//! Registry of known destinations.

use crate::AdapterHandle;
use crate::models::DestinationId;
use std::collections::HashMap;
use std::fmt;

/// Maps destination ids to their adapter.
///
/// Built once at startup and then shared (usually behind an `Arc`) by every
/// orchestration run. New destinations plug in by registering an adapter;
/// nothing else needs to know they exist.
///
/// # Examples
///
/// ```
/// use fanout_destination::DestinationRegistry;
/// use fanout_destination::adapter::LocalDirectoryAdapter;
/// use std::sync::Arc;
///
/// let registry = DestinationRegistry::new().with(Arc::new(LocalDirectoryAdapter::new("local")));
/// assert!(registry.contains("local"));
/// ```
#[derive(Clone, Default)]
pub struct DestinationRegistry {
    adapters: HashMap<DestinationId, AdapterHandle>,
}
impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, returning whichever adapter
    /// previously held that id.
    pub fn register(&mut self, adapter: AdapterHandle) -> Option<AdapterHandle> {
        let id = adapter.id().clone();
        let previous = self.adapters.insert(id.clone(), adapter);
        if previous.is_some() {
            tracing::warn!(destination = %id, "Replaced previously registered destination adapter");
        }
        previous
    }

    pub fn with(mut self, adapter: AdapterHandle) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, id: &str) -> Option<AdapterHandle> {
        self.adapters.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&DestinationId> {
        let mut ids: Vec<_> = self.adapters.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
impl fmt::Debug for DestinationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationRegistry").field("destinations", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockDestination;
    use std::sync::Arc;

    #[test]
    fn test_new_registry_is_empty() {
        let registry = DestinationRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.contains("smms"));
        assert!(registry.get("smms").is_none());
    }

    #[test]
    fn test_register_and_get() {
        let registry = DestinationRegistry::new()
            .with(Arc::new(MockDestination::new("smms")))
            .with(Arc::new(MockDestination::new("github")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("github").map(|a| a.id().clone()), Some(DestinationId::from("github")));
        let ids: Vec<_> = registry.ids().into_iter().map(DestinationId::as_str).collect();
        assert_eq!(ids, vec!["github", "smms"]);
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = DestinationRegistry::new();
        assert!(registry.register(Arc::new(MockDestination::new("jd"))).is_none());
        assert!(registry.register(Arc::new(MockDestination::new("jd").failing("down"))).is_some());
        assert_eq!(registry.len(), 1);
    }
}
