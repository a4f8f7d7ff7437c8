//! Integrity verification hook.
//!
//! The loader consults an injected [`IntegrityVerifier`] before a module is
//! instantiated. The production implementation keeps a sha256 fingerprint
//! of each module's manifest under `{data_root}/integrity/{name}.json`; a
//! fingerprint mismatch is a violation and the module registers as blocked.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock;

/// Outcome of the integrity precheck, remembered on the registry entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Verified,
    BaselineCreated,
    Violation,
}

impl fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IntegrityStatus::Verified => "verified",
            IntegrityStatus::BaselineCreated => "baseline_created",
            IntegrityStatus::Violation => "violation",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("no integrity baseline for module '{0}'")]
    MissingBaseline(String),

    #[error("integrity violation for module '{module}': {detail}")]
    Violation { module: String, detail: String },

    #[error("integrity store I/O failure")]
    Io(#[from] std::io::Error),

    #[error("integrity store entry unreadable")]
    Corrupt(#[from] serde_json::Error),
}

/// Injected integrity dependency consulted by the loader.
pub trait IntegrityVerifier: Send + Sync {
    /// Check a module fingerprint against the stored baseline.
    ///
    /// # Errors
    /// `MissingBaseline` when nothing was recorded yet, `Violation` on a
    /// mismatch, I/O variants on store problems.
    fn ensure_compliance(&self, module: &str, fingerprint: &str) -> Result<(), IntegrityError>;

    /// Record (or replace) the baseline for a module.
    ///
    /// # Errors
    /// I/O variants on store problems.
    fn record_baseline(&self, module: &str, fingerprint: &str) -> Result<(), IntegrityError>;
}

/// Verifier that accepts everything; used when integrity enforcement is
/// switched off.
#[derive(Default)]
pub struct NullVerifier;

impl IntegrityVerifier for NullVerifier {
    fn ensure_compliance(&self, _module: &str, _fingerprint: &str) -> Result<(), IntegrityError> {
        Ok(())
    }

    fn record_baseline(&self, _module: &str, _fingerprint: &str) -> Result<(), IntegrityError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct BaselineEntry {
    module: String,
    fingerprint: String,
    created_at: f64,
}

/// File-backed fingerprint store.
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    /// Open (creating if missing) the baseline directory under `data_root`.
    ///
    /// # Errors
    /// `IntegrityError::Io` when the directory cannot be created.
    pub fn open(data_root: &Path) -> Result<Self, IntegrityError> {
        let dir = data_root.join("integrity");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, module: &str) -> PathBuf {
        self.dir.join(format!("{module}.json"))
    }
}

impl IntegrityVerifier for BaselineStore {
    fn ensure_compliance(&self, module: &str, fingerprint: &str) -> Result<(), IntegrityError> {
        let path = self.entry_path(module);
        if !path.exists() {
            return Err(IntegrityError::MissingBaseline(module.to_owned()));
        }

        let text = fs::read_to_string(&path)?;
        let entry: BaselineEntry = serde_json::from_str(&text)?;

        if entry.fingerprint != fingerprint {
            return Err(IntegrityError::Violation {
                module: module.to_owned(),
                detail: "manifest fingerprint does not match recorded baseline".to_owned(),
            });
        }
        Ok(())
    }

    fn record_baseline(&self, module: &str, fingerprint: &str) -> Result<(), IntegrityError> {
        let entry = BaselineEntry {
            module: module.to_owned(),
            fingerprint: fingerprint.to_owned(),
            created_at: clock::now(),
        };
        let text = serde_json::to_string_pretty(&entry)?;
        fs::write(self.entry_path(module), text)?;
        Ok(())
    }
}
