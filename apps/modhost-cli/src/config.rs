//! Host configuration: YAML file merged with `MODHOST_` environment
//! variables.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use modhost::{IntegrityMode, RuntimeConfig, MIN_PHASE};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding per-module storage, state, and integrity data.
    pub data_root: PathBuf,
    pub min_phase: u32,
    pub integrity: IntegrityMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("modhost-data"),
            min_phase: MIN_PHASE,
            integrity: IntegrityMode::Off,
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid by the optional YAML file, overlaid by
    /// `MODHOST_*` environment variables.
    ///
    /// # Errors
    /// Invalid YAML or environment values surface as figment errors.
    pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Yaml::file(path));
        }
        let config: AppConfig = figment.merge(Env::prefixed("MODHOST_")).extract()?;
        Ok(config)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::new(&self.data_root).with_integrity(self.integrity);
        config.min_phase = self.min_phase;
        config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_a_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.min_phase, MIN_PHASE);
        assert_eq!(config.integrity, IntegrityMode::Off);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "data_root: /tmp/elsewhere\nintegrity: auto_baseline"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.integrity, IntegrityMode::AutoBaseline);
        assert_eq!(config.min_phase, MIN_PHASE);
    }
}
