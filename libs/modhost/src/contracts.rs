//! Module contracts: the entrypoint trait, the descriptor modules register
//! at link time, and the catalog the loader resolves them from.
//!
//! There is no reflective import: a module crate declares a
//! [`ModuleDescriptor`] via `inventory::submit!` and the host binary links
//! it in. [`ModuleCatalog::discover`] then collects every registered
//! descriptor, which is the statically-typed equivalent of scanning a
//! directory for loadable files.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::async_exec::TaskFuture;
use crate::capability::CapabilityMap;
use crate::events::EventContext;
use crate::manifest::{HookFlags, ModuleManifest};
use crate::state::ModuleState;

/// Lifecycle stage the runtime is currently executing for a module.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LifecycleStage {
    #[default]
    Idle,
    Init,
    PreRun,
    Run,
    PostRun,
    OnError,
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LifecycleStage::Idle => "idle",
            LifecycleStage::Init => "init",
            LifecycleStage::PreRun => "pre_run",
            LifecycleStage::Run => "run",
            LifecycleStage::PostRun => "post_run",
            LifecycleStage::OnError => "on_error",
        };
        f.write_str(label)
    }
}

/// Shared runtime bookkeeping visible to every module context.
#[derive(Default)]
pub struct RuntimeState {
    stage: Mutex<LifecycleStage>,
}

impl RuntimeState {
    pub fn stage(&self) -> LifecycleStage {
        *self.stage.lock()
    }

    pub(crate) fn set_stage(&self, stage: LifecycleStage) {
        *self.stage.lock() = stage;
    }
}

/// Per-module context handed to the entrypoint constructor.
#[derive(Clone)]
pub struct ModuleCtx {
    module_name: Arc<str>,
    runtime: Arc<RuntimeState>,
}

impl ModuleCtx {
    pub fn new(module_name: &str, runtime: Arc<RuntimeState>) -> Self {
        Self {
            module_name: Arc::from(module_name),
            runtime,
        }
    }

    #[inline]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The lifecycle stage currently being executed.
    pub fn stage(&self) -> LifecycleStage {
        self.runtime.stage()
    }
}

/// What a `run` invocation produced: either an immediate value, or a
/// suspendable handle the orchestrator submits to the async manager.
pub enum RunOutcome {
    Value(Value),
    Async(TaskFuture),
}

impl From<Value> for RunOutcome {
    fn from(value: Value) -> Self {
        RunOutcome::Value(value)
    }
}

/// The constructible type a manifest's `entrypoint` names.
///
/// Hooks default to no-ops; the manifest's hook flags decide which ones the
/// runtime actually invokes, and validation checks the flags against the
/// descriptor's [`ModuleDescriptor::provided_hooks`].
pub trait ModuleEntrypoint: Send + Sync {
    /// One-time setup after construction, before registration.
    ///
    /// # Errors
    /// An error here fails the whole load and discards the instance.
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before `run` with the action payload.
    ///
    /// # Errors
    /// Treated like a `run` failure by the orchestrator.
    fn pre_run(&self, payload: &Map<String, Value>) -> anyhow::Result<()> {
        let _ = payload;
        Ok(())
    }

    /// The module's main operation.
    ///
    /// # Errors
    /// Routed to `on_error` and reported in the result envelope.
    fn run(&self, payload: &Map<String, Value>) -> anyhow::Result<RunOutcome>;

    /// Runs after `run` with its result.
    ///
    /// # Errors
    /// Treated like a `run` failure by the orchestrator.
    fn post_run(&self, result: &Value) -> anyhow::Result<()> {
        let _ = result;
        Ok(())
    }

    /// Runs when any stage of the run path failed.
    ///
    /// # Errors
    /// Errors here are logged and swallowed.
    fn on_error(&self, error: &anyhow::Error) -> anyhow::Result<()> {
        let _ = error;
        Ok(())
    }

    /// Dispatch a named event handler (reactive or manual wiring).
    ///
    /// # Errors
    /// Unknown methods are an error; the default implementation knows none.
    fn invoke_handler(&self, method: &str, ctx: &EventContext) -> anyhow::Result<Value> {
        let _ = ctx;
        anyhow::bail!("unknown handler method: {method}")
    }
}

/// Constructor signature for an entrypoint.
pub type ModuleConstructor = fn(
    ModuleCtx,
    CapabilityMap,
    Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>>;

/// Link-time module registration record.
///
/// `provided_hooks` and `handler_methods` describe what the entrypoint type
/// actually implements, so the validator can check the manifest against
/// them without reflection.
pub struct ModuleDescriptor {
    pub manifest: fn() -> ModuleManifest,
    pub entrypoint: &'static str,
    pub constructor: ModuleConstructor,
    pub provided_hooks: HookFlags,
    pub handler_methods: &'static [&'static str],
}

impl ModuleDescriptor {
    pub fn provides_handler(&self, method: &str) -> bool {
        self.handler_methods.contains(&method)
    }
}

inventory::collect!(ModuleDescriptor);

struct CatalogEntry {
    manifest: ModuleManifest,
    descriptor: &'static ModuleDescriptor,
}

/// Name-indexed view over every registered module descriptor.
#[derive(Default)]
pub struct ModuleCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    /// Empty catalog; combine with [`ModuleCatalog::insert`] in tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every descriptor registered through `inventory`.
    pub fn discover() -> Self {
        let mut catalog = Self::new();
        for descriptor in inventory::iter::<ModuleDescriptor> {
            catalog.insert(descriptor);
        }
        catalog
    }

    /// Add one descriptor. Later registrations win on name collisions,
    /// which is logged.
    pub fn insert(&mut self, descriptor: &'static ModuleDescriptor) {
        let manifest = (descriptor.manifest)();
        let name = manifest.name.clone();
        if self.entries.contains_key(&name) {
            tracing::warn!(module = %name, "Duplicate module descriptor, replacing");
        }
        self.entries.insert(
            name,
            CatalogEntry {
                manifest,
                descriptor,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<(&ModuleManifest, &'static ModuleDescriptor)> {
        self.entries
            .get(name)
            .map(|entry| (&entry.manifest, entry.descriptor))
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
