// cloudpipe-core/src/blueprint.rs
// ============================================================================
// Module: Blueprints
// Description: Declared binding kinds with live pipe slot accounting.
// Purpose: Bound how many pipes a need or offer may instantiate.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A blueprint declares a binding kind: its adapter and proto templates, the
//! default adapter selection, and how many live pipes it may hold. A *need*
//! holds at most one pipe; an *offer* is unbounded. Slot reservation and
//! release are the only mutations and run under a per-blueprint mutex so
//! reservation stays serializable across resources.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use tracing::error;

use crate::pipe::Pipe;
use crate::template::AdapterType;
use crate::template::PipeTemplate;

// ============================================================================
// SECTION: Blueprint
// ============================================================================

/// A declared binding kind with templates and a slot count.
#[derive(Debug, Serialize)]
pub struct Blueprint {
    /// Blueprint name, unique within its resource's needs or offers.
    pub name: String,
    /// Adapters used when a binding names none.
    #[serde(rename = "defaultAdapters")]
    pub default_adapters: Vec<AdapterType>,
    /// Resolved adapter templates.
    pub adapters: Vec<PipeTemplate>,
    /// Resolved proto templates; the first is the default.
    pub protos: Vec<PipeTemplate>,
    /// Maximum live pipes; zero means unbounded.
    #[serde(rename = "maxPipes")]
    pub max_pipes: usize,
    /// Identifiers of live pipes holding a slot.
    #[serde(skip)]
    live: Mutex<HashSet<String>>,
}

impl Blueprint {
    /// Builds a blueprint with an explicit slot count.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        default_adapters: Vec<AdapterType>,
        adapters: Vec<PipeTemplate>,
        protos: Vec<PipeTemplate>,
        max_pipes: usize,
    ) -> Self {
        Self {
            name: name.into(),
            default_adapters,
            adapters,
            protos,
            max_pipes,
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Builds a need: a blueprint holding at most one pipe.
    #[must_use]
    pub fn need(
        name: impl Into<String>,
        default_adapters: Vec<AdapterType>,
        adapters: Vec<PipeTemplate>,
        protos: Vec<PipeTemplate>,
    ) -> Self {
        Self::new(name, default_adapters, adapters, protos, 1)
    }

    /// Builds an offer: a blueprint with unbounded pipes.
    #[must_use]
    pub fn offer(
        name: impl Into<String>,
        default_adapters: Vec<AdapterType>,
        adapters: Vec<PipeTemplate>,
        protos: Vec<PipeTemplate>,
    ) -> Self {
        Self::new(name, default_adapters, adapters, protos, 0)
    }

    /// Reserves a slot for a pipe. Returns false when the blueprint is full.
    #[must_use]
    pub fn add_pipe(&self, id: &str) -> bool {
        let Ok(mut live) = self.live.lock() else {
            return false;
        };
        if self.max_pipes != 0 && live.len() >= self.max_pipes {
            return false;
        }
        if !live.insert(id.to_string()) {
            // A slot for this id is already held; the caller's conflict check
            // should have caught the duplicate first.
            error!(blueprint = %self.name, pipe = %id, "slot accounting out of sync");
            return false;
        }
        true
    }

    /// Releases the slot held by a pipe, if any.
    pub fn delete_pipe(&self, id: &str) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(id);
        }
    }

    /// Number of live pipes currently holding a slot.
    #[must_use]
    pub fn live_pipes(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    /// Looks up the adapter template carrying the given tag.
    #[must_use]
    pub fn adapter(&self, tag: &str) -> Option<&PipeTemplate> {
        self.adapters.iter().find(|template| template.id.as_str() == tag)
    }

    /// Looks up the proto template carrying the given tag.
    #[must_use]
    pub fn proto(&self, tag: &str) -> Option<&PipeTemplate> {
        self.protos.iter().find(|template| template.id.as_str() == tag)
    }
}

/// Finds a blueprint by name in a needs or offers list.
#[must_use]
pub fn find_blueprint<'a>(
    blueprints: &'a [Arc<Blueprint>],
    name: &str,
) -> Option<&'a Arc<Blueprint>> {
    blueprints.iter().find(|blueprint| blueprint.name == name)
}

// ============================================================================
// SECTION: Binding
// ============================================================================

/// Request payload that instantiates a blueprint into a pipe.
///
/// Adapter and proto tags stay raw strings here so an unknown tag surfaces as
/// a not-found resolution error rather than a decode failure.
#[derive(Debug, Default, Deserialize)]
pub struct Binding {
    /// Initial pipe content; at minimum the pipe id.
    #[serde(default)]
    pub pipe: Pipe,
    /// Wanted adapter tags; empty means the blueprint's defaults.
    #[serde(default)]
    pub adapters: Vec<String>,
    /// Wanted proto tag; absent means the blueprint's first proto.
    #[serde(default)]
    pub proto: Option<String>,
}

impl Binding {
    /// Returns true when the binding names no adapters explicitly.
    #[must_use]
    pub fn wants_default_adapters(&self) -> bool {
        self.adapters.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
