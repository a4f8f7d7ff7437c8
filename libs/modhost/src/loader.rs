//! Module loader: descriptor resolution, integrity precheck, validation,
//! capability binding, state loading, construction, lifecycle, wiring, and
//! registration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::async_exec::AsyncTaskManager;
use crate::capability::{CapabilityError, CapabilityManager, CapabilityMap};
use crate::contracts::{LifecycleStage, ModuleCatalog, ModuleCtx, RuntimeState};
use crate::events::{EventBus, EventContext};
use crate::integrity::{
    BaselineStore, IntegrityError, IntegrityStatus, IntegrityVerifier, NullVerifier,
};
use crate::manifest::{ModuleManifest, MIN_PHASE};
use crate::registry::{ModuleEntry, ModuleRegistry};
use crate::scheduler::Scheduler;
use crate::state::ModuleState;
use crate::storage::{ModuleStorage, StorageError};
use crate::validation::{validate_module, ValidationError};

/// How strictly the loader enforces module integrity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityMode {
    /// No enforcement; every module verifies.
    #[default]
    Off,
    /// Record a baseline on first sight; verify afterwards.
    AutoBaseline,
    /// A missing baseline is treated like a violation.
    Strict,
}

/// Runtime construction parameters.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub data_root: PathBuf,
    pub min_phase: u32,
    pub integrity: IntegrityMode,
    /// Implicit `module.run` grant; disabled only by test harnesses.
    pub grant_module_run: bool,
}

impl RuntimeConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            min_phase: MIN_PHASE,
            integrity: IntegrityMode::Off,
            grant_module_run: true,
        }
    }

    #[must_use]
    pub fn with_integrity(mut self, mode: IntegrityMode) -> Self {
        self.integrity = mode;
        self
    }

    #[must_use]
    pub fn with_grant_module_run(mut self, enabled: bool) -> Self {
        self.grant_module_run = enabled;
        self
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module '{0}' is not present in the catalog")]
    UnknownModule(String),

    #[error("integrity violation: module '{module}' load blocked")]
    IntegrityBlocked {
        module: String,
        #[source]
        source: IntegrityError,
    },

    #[error("integrity check failed for module '{module}'")]
    Integrity {
        module: String,
        #[source]
        source: IntegrityError,
    },

    #[error("validation failed for module '{module}'")]
    Validation {
        module: String,
        #[source]
        source: ValidationError,
    },

    #[error("storage initialization failed for module '{module}'")]
    Storage {
        module: String,
        #[source]
        source: StorageError,
    },

    #[error("capability binding failed for module '{module}'")]
    Capability {
        module: String,
        #[source]
        source: CapabilityError,
    },

    #[error("constructor failed for module '{module}'")]
    Construct {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("init() hook failed for module '{module}'")]
    InitHook {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("runtime setup failed")]
    Setup(#[source] IntegrityError),
}

/// Successful load response.
#[derive(Clone, Debug, Serialize)]
pub struct LoadReport {
    pub ok: bool,
    pub module: String,
    pub capabilities_granted: Vec<String>,
    pub reactive_handlers_registered: usize,
    pub state_initialized: bool,
    pub integrity_status: IntegrityStatus,
}

/// Discovers descriptors, validates, binds capabilities, constructs
/// instances, and runs the load-time lifecycle.
///
/// The loader also owns the runtime's shared infrastructure: the event
/// bus, the scheduler, and the async task manager, wired together at
/// construction exactly once.
pub struct ModuleLoader {
    config: RuntimeConfig,
    catalog: ModuleCatalog,
    registry: ModuleRegistry,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    async_manager: Arc<AsyncTaskManager>,
    capability_manager: CapabilityManager,
    verifier: Arc<dyn IntegrityVerifier>,
    runtime_state: Arc<RuntimeState>,
}

impl ModuleLoader {
    /// Build the loader and wire the bus/scheduler/async-manager triangle.
    ///
    /// # Errors
    /// `LoadError::Setup` when the integrity store cannot be opened.
    pub fn new(config: RuntimeConfig, catalog: ModuleCatalog) -> Result<Self, LoadError> {
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(Scheduler::new(Arc::downgrade(&bus)));
        let async_manager = Arc::new(AsyncTaskManager::new(Arc::downgrade(&bus)));
        bus.attach_scheduler(scheduler.clone());
        bus.attach_async_manager(async_manager.clone());

        let verifier: Arc<dyn IntegrityVerifier> = match config.integrity {
            IntegrityMode::Off => Arc::new(NullVerifier),
            IntegrityMode::AutoBaseline | IntegrityMode::Strict => {
                Arc::new(BaselineStore::open(&config.data_root).map_err(LoadError::Setup)?)
            }
        };

        let capability_manager = CapabilityManager::new(
            Some(bus.clone()),
            Some(scheduler.clone()),
            Some(async_manager.clone()),
        )
        .with_implicit_module_run(config.grant_module_run);

        Ok(Self {
            config,
            catalog,
            registry: ModuleRegistry::new(),
            bus,
            scheduler,
            async_manager,
            capability_manager,
            verifier,
            runtime_state: Arc::new(RuntimeState::default()),
        })
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn async_manager(&self) -> &Arc<AsyncTaskManager> {
        &self.async_manager
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Load a module by catalog name.
    ///
    /// # Errors
    /// Every phase halts on its first error; see [`LoadError`]. An
    /// integrity violation additionally registers the module as blocked.
    pub fn load(&self, name: &str) -> Result<LoadReport, LoadError> {
        tracing::info!(module = name, "Loading module");

        // 1) Resolve the descriptor (the static-registration stand-in for
        //    importing the module's source).
        let Some((manifest, descriptor)) = self.catalog.get(name) else {
            return Err(LoadError::UnknownModule(name.to_owned()));
        };
        let manifest = manifest.clone();

        // 2) Integrity precheck.
        let integrity_status = self.check_integrity(&manifest)?;

        // 3) Validation pipeline.
        validate_module(
            &manifest,
            descriptor,
            self.capability_manager.registry(),
            self.config.min_phase,
        )
        .map_err(|source| LoadError::Validation {
            module: name.to_owned(),
            source,
        })?;

        // 4) Storage handle. State requires persistence, so this exists
        //    even when no storage.* capability was requested.
        let storage = Arc::new(
            ModuleStorage::new(&self.config.data_root, &manifest.name).map_err(|source| {
                LoadError::Storage {
                    module: name.to_owned(),
                    source,
                }
            })?,
        );

        // 5) Capability map (module.run is implicit).
        let capabilities = self
            .capability_manager
            .build_map(&manifest, &manifest.name, &storage)
            .map_err(|source| LoadError::Capability {
                module: name.to_owned(),
                source,
            })?;

        // 6) Persistent state.
        let state = Arc::new(ModuleState::load(
            &manifest.name,
            manifest.state_version,
            storage,
            manifest.default_state.clone(),
        ));

        // 7) Instantiate the entrypoint.
        let ctx = ModuleCtx::new(&manifest.name, self.runtime_state.clone());
        let instance = (descriptor.constructor)(ctx, capabilities.clone(), state.clone())
            .map_err(|source| LoadError::Construct {
                module: name.to_owned(),
                source,
            })?;

        // 8) Init hook.
        if manifest.hooks.init {
            self.runtime_state.set_stage(LifecycleStage::Init);
            let outcome = instance.init();
            self.runtime_state.set_stage(LifecycleStage::Idle);
            outcome.map_err(|source| LoadError::InitHook {
                module: name.to_owned(),
                source,
            })?;
        }

        // 9) Wire reactive handlers, plus legacy manual subscriptions.
        let mut reactive_registered = 0;
        if manifest.has_reactive() {
            for (event_type, method) in &manifest.reactive.handlers {
                self.wire_handler(&manifest.name, event_type, method, &instance);
                reactive_registered += 1;
            }
        }
        for (event_type, method) in &manifest.event_subscriptions {
            self.wire_handler(&manifest.name, event_type, method, &instance);
        }

        // 10) Register and announce.
        let report = LoadReport {
            ok: true,
            module: manifest.name.clone(),
            capabilities_granted: capabilities.names(),
            reactive_handlers_registered: reactive_registered,
            state_initialized: true,
            integrity_status,
        };

        let version = manifest.version.clone();
        let phase = manifest.phase;
        self.registry.register(ModuleEntry {
            status: ModuleEntry::status_for(integrity_status),
            instance: Some(instance),
            capabilities,
            state: Some(state),
            integrity_status,
            manifest,
        });

        self.publish_loaded(name, &version, phase);
        tracing::info!(
            module = name,
            integrity = %integrity_status,
            "Module loaded"
        );
        Ok(report)
    }

    fn check_integrity(&self, manifest: &ModuleManifest) -> Result<IntegrityStatus, LoadError> {
        let name = &manifest.name;
        let fingerprint = manifest.fingerprint();

        match self.verifier.ensure_compliance(name, &fingerprint) {
            Ok(()) => Ok(IntegrityStatus::Verified),
            Err(IntegrityError::MissingBaseline(_))
                if self.config.integrity == IntegrityMode::AutoBaseline =>
            {
                self.verifier
                    .record_baseline(name, &fingerprint)
                    .map_err(|source| LoadError::Integrity {
                        module: name.clone(),
                        source,
                    })?;
                tracing::info!(module = %name, "Integrity baseline created");
                Ok(IntegrityStatus::BaselineCreated)
            }
            Err(source @ (IntegrityError::MissingBaseline(_) | IntegrityError::Violation { .. })) => {
                tracing::error!(module = %name, error = %source, "Integrity violation, load blocked");
                self.register_blocked(manifest.clone());
                Err(LoadError::IntegrityBlocked {
                    module: name.clone(),
                    source,
                })
            }
            Err(source) => Err(LoadError::Integrity {
                module: name.clone(),
                source,
            }),
        }
    }

    /// A blocked module is registered without instance, capabilities, or
    /// state; the orchestrator refuses to run it.
    fn register_blocked(&self, manifest: ModuleManifest) {
        self.registry.register(ModuleEntry {
            status: ModuleEntry::status_for(IntegrityStatus::Violation),
            instance: None,
            capabilities: CapabilityMap::default(),
            state: None,
            integrity_status: IntegrityStatus::Violation,
            manifest,
        });
    }

    fn wire_handler(
        &self,
        module: &str,
        event_type: &str,
        method: &str,
        instance: &Arc<dyn crate::contracts::ModuleEntrypoint>,
    ) {
        let target = instance.clone();
        let method_name = method.to_owned();
        self.bus.subscribe_sync(
            event_type,
            &format!("{module}::{method}"),
            Arc::new(move |ctx: &EventContext| target.invoke_handler(&method_name, ctx)),
        );
        tracing::debug!(module, event_type, method, "Wired event handler");
    }

    fn publish_loaded(&self, name: &str, version: &str, phase: u32) {
        let mut payload = Map::new();
        payload.insert("module_name".to_owned(), Value::from(name));
        payload.insert("version".to_owned(), Value::from(version));
        payload.insert("phase".to_owned(), json!(phase));
        let ctx = EventContext::new("module.loaded", "module_loader", payload)
            .with_category("lifecycle");
        self.bus.publish("module.loaded", &ctx);
    }
}
