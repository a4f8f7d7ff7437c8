//! Catalogue of grantable capability kinds.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;

/// How much a capability can affect the world outside the module sandbox.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Moderate,
}

/// Registry row for one capability kind.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CapabilityDef {
    pub description: &'static str,
    pub level: SafetyLevel,
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("unknown capability: '{0}'")]
    Unknown(String),

    #[error("capability '{0}' is restricted and cannot be granted")]
    Restricted(String),

    #[error("capability '{name}' cannot be satisfied: {missing} is not available")]
    Unsatisfied { name: String, missing: &'static str },
}

/// Static table of capability kinds plus the disjoint restricted set.
///
/// Restricted names never appear in the grantable table; a name that is
/// restricted or simply unknown must be refused during validation.
pub struct CapabilityRegistry {
    entries: BTreeMap<&'static str, CapabilityDef>,
    restricted: BTreeSet<&'static str>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();

        entries.insert(
            "log.basic",
            CapabilityDef {
                description: "Basic logging capability",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "log.advanced",
            CapabilityDef {
                description: "Advanced logging with metadata",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "storage.read",
            CapabilityDef {
                description: "Read from module storage",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "storage.write",
            CapabilityDef {
                description: "Write to module storage",
                level: SafetyLevel::Moderate,
            },
        );
        entries.insert(
            "network",
            CapabilityDef {
                description: "Network access for HTTP/HTTPS requests",
                level: SafetyLevel::Moderate,
            },
        );
        entries.insert(
            "crypto",
            CapabilityDef {
                description: "Cryptographic operations",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "time",
            CapabilityDef {
                description: "Time and date operations",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "module.run",
            CapabilityDef {
                description: "Permission to execute module",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "event.publish",
            CapabilityDef {
                description: "Publish events to the event bus",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "event.subscribe",
            CapabilityDef {
                description: "Subscribe to events from the event bus",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "task.schedule.interval",
            CapabilityDef {
                description: "Schedule repeating interval tasks",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "task.schedule.oneshot",
            CapabilityDef {
                description: "Schedule one-time tasks after delay",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "task.schedule.event",
            CapabilityDef {
                description: "Schedule event-triggered tasks",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "task.cancel",
            CapabilityDef {
                description: "Cancel scheduled tasks",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "async.schedule",
            CapabilityDef {
                description: "Schedule suspendable tasks for execution",
                level: SafetyLevel::Safe,
            },
        );
        entries.insert(
            "async.await",
            CapabilityDef {
                description: "Poll suspendable task results",
                level: SafetyLevel::Safe,
            },
        );

        let restricted = ["network.raw", "os.exec", "fs.root"].into_iter().collect();

        Self {
            entries,
            restricted,
        }
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityDef> {
        self.entries.get(name)
    }

    /// Whether `name` exists and is not restricted.
    pub fn has(&self, name: &str) -> bool {
        !self.is_restricted(name) && self.entries.contains_key(name)
    }

    pub fn is_restricted(&self, name: &str) -> bool {
        self.restricted.contains(name)
    }

    /// All grantable capability names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Validate a requested capability list against the catalogue.
    ///
    /// # Errors
    /// `Restricted` for names in the restricted set, `Unknown` otherwise.
    pub fn validate_list(&self, names: &[String]) -> Result<(), CapabilityError> {
        for name in names {
            if self.is_restricted(name) {
                return Err(CapabilityError::Restricted(name.clone()));
            }
            if !self.entries.contains_key(name.as_str()) {
                return Err(CapabilityError::Unknown(name.clone()));
            }
        }
        Ok(())
    }
}
