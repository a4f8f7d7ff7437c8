//! Registry of loaded modules.
//!
//! Each entry owns the module instance and shares its capability map and
//! state container. A module is `loaded` only when its integrity status is
//! `verified`; anything else registers as `blocked` and the orchestrator
//! refuses to run it.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::capability::CapabilityMap;
use crate::contracts::ModuleEntrypoint;
use crate::integrity::IntegrityStatus;
use crate::manifest::ModuleManifest;
use crate::state::ModuleState;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Loaded,
    Blocked,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Loaded => f.write_str("loaded"),
            ModuleStatus::Blocked => f.write_str("blocked"),
        }
    }
}

/// Everything the runtime keeps for one registered module.
pub struct ModuleEntry {
    pub manifest: ModuleManifest,
    /// `None` for blocked modules, which are never instantiated.
    pub instance: Option<Arc<dyn ModuleEntrypoint>>,
    pub capabilities: CapabilityMap,
    pub state: Option<Arc<ModuleState>>,
    pub status: ModuleStatus,
    pub integrity_status: IntegrityStatus,
}

impl ModuleEntry {
    /// Status derived from integrity: only `verified` modules are runnable.
    pub fn status_for(integrity: IntegrityStatus) -> ModuleStatus {
        if integrity == IntegrityStatus::Verified {
            ModuleStatus::Loaded
        } else {
            ModuleStatus::Blocked
        }
    }
}

/// Concurrent name-indexed module registry, exclusively mutated by the
/// loader.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: DashMap<String, Arc<ModuleEntry>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an entry (re-loading a module replaces it).
    pub fn register(&self, entry: ModuleEntry) {
        self.entries
            .insert(entry.manifest.name.clone(), Arc::new(entry));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleEntry>> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a module holds a granted capability.
    pub fn has_capability(&self, name: &str, capability: &str) -> bool {
        self.get(name)
            .is_some_and(|entry| entry.capabilities.has(capability))
    }

    pub fn state_of(&self, name: &str) -> Option<Arc<ModuleState>> {
        self.get(name).and_then(|entry| entry.state.clone())
    }
}
