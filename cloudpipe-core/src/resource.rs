// cloudpipe-core/src/resource.rs
// ============================================================================
// Module: Resource Registry
// Description: In-memory resource map with per-resource pipe locking.
// Purpose: Own the pipes, blueprints, and update callback of each application.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! A resource is one named application served by the broker: its declared
//! needs and offers, its live pipes, optional default data merged into every
//! new pipe, and an optional callback that publishes configuration into the
//! owning application. The registry is populated by the deployment adapter at
//! startup and never mutated afterwards; each resource carries its own
//! reader/writer lock over the pipe map.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;

use crate::blueprint::Blueprint;
use crate::pipe::Pipe;

// ============================================================================
// SECTION: Callback
// ============================================================================

/// Error reported by an update callback.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

/// Callback invoked whenever a pipe's configuration changes.
///
/// Callback errors are logged by the broker and never fail the triggering
/// request; retries are the deployment adapter's concern.
pub type PipeCallback = Arc<dyn Fn(&Pipe) -> Result<(), CallbackError> + Send + Sync>;

// ============================================================================
// SECTION: Resource
// ============================================================================

/// One application owning needs, offers, and pipes on this broker.
pub struct Resource {
    /// Resource identifier, the first path segment of its routes.
    pub id: String,
    /// Declared needs (blueprints holding at most one pipe).
    pub needs: Vec<Arc<Blueprint>>,
    /// Declared offers (unbounded blueprints).
    pub offers: Vec<Arc<Blueprint>>,
    /// Live pipes keyed by pipe id, guarded by the resource lock.
    pub pipes: RwLock<HashMap<String, Pipe>>,
    /// Default data merged into the local end of every raw pipe.
    pub default_data: Option<Value>,
    /// Callback publishing configuration into the owning application.
    pub update_callback: Option<PipeCallback>,
}

impl Resource {
    /// Builds an empty resource with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            needs: Vec::new(),
            offers: Vec::new(),
            pipes: RwLock::new(HashMap::new()),
            default_data: None,
            update_callback: None,
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("needs", &self.needs.len())
            .field("offers", &self.offers.len())
            .field("default_data", &self.default_data)
            .field("has_callback", &self.update_callback.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Process-wide resource map, read-only after startup.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, Arc<Resource>>,
}

impl ResourceRegistry {
    /// Builds a registry from the deployment adapter's resource set.
    #[must_use]
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources: resources
                .into_iter()
                .map(|resource| (resource.id.clone(), Arc::new(resource)))
                .collect(),
        }
    }

    /// Looks up a resource by identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Resource>> {
        self.resources.get(id).map(Arc::clone)
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true when no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only registry assertions.")]

    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::json;

    use super::CallbackError;
    use super::Resource;
    use super::ResourceRegistry;
    use crate::pipe::Pipe;

    #[test]
    fn registry_lookup_by_id() {
        let registry = ResourceRegistry::new(vec![Resource::new("frontend"), Resource::new("db")]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("frontend").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn callback_observes_pipe() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut resource = Resource::new("frontend");
        resource.update_callback = Some(Arc::new(move |pipe: &Pipe| {
            sink.lock()
                .map_err(|_| CallbackError("sink lock poisoned".to_string()))?
                .push(pipe.id.clone());
            Ok(())
        }));
        let callback = resource.update_callback.as_ref().unwrap();
        let pipe = Pipe {
            id: "p1".to_string(),
            ..Pipe::default()
        };
        callback(&pipe).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["p1".to_string()]);
        assert_eq!(resource.default_data, None);
        resource.default_data = Some(json!({"URI": "https://svc"}));
        assert!(resource.default_data.is_some());
    }
}
