//! Persistent per-module state.
//!
//! State lives in `state.json` inside the module's storage sandbox with the
//! on-disk layout `{ "module": <name>, "version": <int>, "state": {...} }`.
//! The in-memory mirror tracks a dirty flag and keeps the last-saved
//! snapshot around for rollback. A corrupt or missing file falls back to
//! the manifest defaults; the file is rewritten on the next save.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::{ModuleStorage, StorageError};

/// File name of the state container inside the module sandbox.
pub const STATE_FILE: &str = "state.json";

/// Keys that may never appear in a module's `default_state`.
pub const RESERVED_KEYS: &[&str] = &["__internal__", "_state", "_snapshot"];

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state value is not JSON-serializable")]
    NotSerializable(#[source] serde_json::Error),

    #[error("state save failed")]
    Save(#[source] StorageError),
}

#[derive(Serialize, serde::Deserialize)]
struct StateEnvelope {
    module: String,
    version: u32,
    state: Map<String, Value>,
}

struct StateInner {
    current: Map<String, Value>,
    snapshot: Map<String, Value>,
    dirty: bool,
}

/// Atomic JSON state container for one module.
pub struct ModuleState {
    module_name: String,
    state_version: u32,
    storage: Arc<ModuleStorage>,
    defaults: Map<String, Value>,
    inner: Mutex<StateInner>,
}

impl ModuleState {
    /// Load existing state from storage, or initialize from `defaults`.
    ///
    /// Never fails: a missing or corrupt `state.json` yields the defaults
    /// with the dirty flag set, so the next save materializes a clean file.
    pub fn load(
        module_name: &str,
        state_version: u32,
        storage: Arc<ModuleStorage>,
        defaults: Map<String, Value>,
    ) -> Self {
        let state = Self {
            module_name: module_name.to_owned(),
            state_version,
            storage,
            defaults,
            inner: Mutex::new(StateInner {
                current: Map::new(),
                snapshot: Map::new(),
                dirty: false,
            }),
        };
        state.reload();
        state
    }

    fn reload(&self) {
        let loaded = if self.storage.exists(STATE_FILE) {
            match self.storage.read_json::<StateEnvelope>(STATE_FILE) {
                Ok(envelope) => Some(envelope.state),
                Err(e) => {
                    tracing::warn!(
                        module = %self.module_name,
                        error = %e,
                        "State file unreadable, falling back to defaults"
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut inner = self.inner.lock();
        match loaded {
            Some(state) => {
                inner.snapshot = state.clone();
                inner.current = state;
                inner.dirty = false;
            }
            None => {
                inner.current = self.defaults.clone();
                inner.snapshot = self.defaults.clone();
                // Dirty so the next save writes the defaults to disk.
                inner.dirty = true;
            }
        }
    }

    /// Reload from disk, discarding unsaved changes.
    pub fn refresh(&self) {
        self.reload();
    }

    /// Persist the current state atomically. A clean state is a no-op.
    ///
    /// # Errors
    /// Returns `StateError::Save` when the underlying write fails; the state
    /// stays dirty so a later save can retry.
    pub fn save(&self) -> Result<(), StateError> {
        let envelope = {
            let inner = self.inner.lock();
            if !inner.dirty {
                return Ok(());
            }
            StateEnvelope {
                module: self.module_name.clone(),
                version: self.state_version,
                state: inner.current.clone(),
            }
        };

        self.storage
            .write_json(STATE_FILE, &envelope)
            .map_err(StateError::Save)?;

        let mut inner = self.inner.lock();
        inner.snapshot = envelope.state;
        inner.dirty = false;
        Ok(())
    }

    /// Discard all modifications since the last successful save.
    pub fn rollback(&self) {
        let mut inner = self.inner.lock();
        inner.current = inner.snapshot.clone();
        inner.dirty = false;
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().current.get(key).cloned()
    }

    /// Set a single value. The value must encode to JSON.
    ///
    /// # Errors
    /// `StateError::NotSerializable` when encoding fails (e.g. a NaN float).
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(StateError::NotSerializable)?;
        let mut inner = self.inner.lock();
        inner.current.insert(key.to_owned(), value);
        inner.dirty = true;
        Ok(())
    }

    /// Bulk update from a JSON map.
    pub fn update(&self, values: Map<String, Value>) {
        let mut inner = self.inner.lock();
        for (key, value) in values {
            inner.current.insert(key, value);
        }
        inner.dirty = true;
    }

    /// Remove a key; reports whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.remove(key).is_some() {
            inner.dirty = true;
            true
        } else {
            false
        }
    }

    /// Reset the state to the manifest defaults (requires `save` to persist).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.current = self.defaults.clone();
        inner.dirty = true;
    }

    /// Whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().current.contains_key(key)
    }

    /// Deep copy of the whole state.
    pub fn dump(&self) -> Map<String, Value> {
        self.inner.lock().current.clone()
    }

    /// Whether there are unsaved modifications.
    pub fn is_modified(&self) -> bool {
        self.inner.lock().dirty
    }
}
