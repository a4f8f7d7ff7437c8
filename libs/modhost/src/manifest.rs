//! Module manifests.
//!
//! A manifest is the immutable self-description a module ships alongside
//! its entrypoint: identity, requested capabilities, lifecycle hook flags,
//! default state, and declarative event handler wiring.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lowest module phase the runtime still accepts.
pub const MIN_PHASE: u32 = 36;

fn default_state_version() -> u32 {
    1
}

/// Requested capabilities, split into hard requirements and optional
/// extras.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CapabilityRequest {
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

impl CapabilityRequest {
    /// Required and optional names in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.requires.iter().chain(self.optional.iter())
    }
}

/// Which lifecycle hooks the runtime should invoke.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct HookFlags {
    #[serde(default)]
    pub init: bool,
    #[serde(default)]
    pub pre_run: bool,
    #[serde(default)]
    pub post_run: bool,
    #[serde(default)]
    pub on_error: bool,
}

impl HookFlags {
    pub const ALL: HookFlags = HookFlags {
        init: true,
        pre_run: true,
        post_run: true,
        on_error: true,
    };

    pub const NONE: HookFlags = HookFlags {
        init: false,
        pre_run: false,
        post_run: false,
        on_error: false,
    };
}

/// Declarative event handler wiring, auto-subscribed at load time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReactiveSpec {
    #[serde(default)]
    pub enabled: bool,
    /// event type -> handler method name on the entrypoint.
    #[serde(default)]
    pub handlers: std::collections::BTreeMap<String, String>,
}

/// The module's declarative self-description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    pub phase: u32,
    pub entrypoint: String,
    #[serde(default)]
    pub capabilities: CapabilityRequest,
    #[serde(default)]
    pub hooks: HookFlags,
    #[serde(default)]
    pub default_state: Map<String, Value>,
    #[serde(default = "default_state_version")]
    pub state_version: u32,
    /// Legacy/manual subscriptions: event type -> handler method name.
    #[serde(default)]
    pub event_subscriptions: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub reactive: ReactiveSpec,
}

impl ModuleManifest {
    /// A manifest with only the required fields filled in.
    pub fn minimal(name: &str, version: &str, phase: u32, entrypoint: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            phase,
            entrypoint: entrypoint.to_owned(),
            capabilities: CapabilityRequest::default(),
            hooks: HookFlags::default(),
            default_state: Map::new(),
            state_version: default_state_version(),
            event_subscriptions: std::collections::BTreeMap::new(),
            reactive: ReactiveSpec::default(),
        }
    }

    /// Whether reactive wiring is requested.
    pub fn has_reactive(&self) -> bool {
        self.reactive.enabled
    }

    /// Stable sha256 fingerprint over the serialized manifest, used by the
    /// integrity baseline store.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        hex::encode(hasher.finalize())
    }
}
