//! End-to-end: capability denial and load-time capability validation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use modhost::capability::CapabilityMap;
use modhost::manifest::{CapabilityRequest, HookFlags};
use modhost::{
    Action, ExecutionOrchestrator, ModuleCatalog, ModuleCtx, ModuleDescriptor, ModuleEntrypoint,
    ModuleManifest, ModuleState, RunOutcome, RuntimeConfig,
};
use serde_json::{json, Map, Value};

static RUN_CALLS: AtomicUsize = AtomicUsize::new(0);

struct PlainModule;

impl ModuleEntrypoint for PlainModule {
    fn run(&self, _payload: &Map<String, Value>) -> anyhow::Result<RunOutcome> {
        RUN_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(RunOutcome::Value(json!({"ok": true})))
    }
}

fn plain_manifest() -> ModuleManifest {
    ModuleManifest {
        capabilities: CapabilityRequest {
            requires: vec!["log.basic".to_owned()],
            optional: vec![],
        },
        ..ModuleManifest::minimal("plain", "1.0.0", 37, "PlainModule")
    }
}

fn plain_constructor(
    _ctx: ModuleCtx,
    _caps: CapabilityMap,
    _state: Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>> {
    Ok(Arc::new(PlainModule))
}

static PLAIN: ModuleDescriptor = ModuleDescriptor {
    manifest: plain_manifest,
    entrypoint: "PlainModule",
    constructor: plain_constructor,
    provided_hooks: HookFlags::NONE,
    handler_methods: &[],
};

struct FreeModule;

impl ModuleEntrypoint for FreeModule {
    fn run(&self, _payload: &Map<String, Value>) -> anyhow::Result<RunOutcome> {
        Ok(RunOutcome::Value(json!({"ok": true})))
    }
}

fn free_manifest() -> ModuleManifest {
    ModuleManifest::minimal("free", "1.0.0", 37, "FreeModule")
}

fn free_constructor(
    _ctx: ModuleCtx,
    _caps: CapabilityMap,
    _state: Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>> {
    Ok(Arc::new(FreeModule))
}

static FREE: ModuleDescriptor = ModuleDescriptor {
    manifest: free_manifest,
    entrypoint: "FreeModule",
    constructor: free_constructor,
    provided_hooks: HookFlags::NONE,
    handler_methods: &[],
};

fn greedy_manifest() -> ModuleManifest {
    ModuleManifest {
        capabilities: CapabilityRequest {
            requires: vec!["os.exec".to_owned()],
            optional: vec![],
        },
        ..ModuleManifest::minimal("greedy", "1.0.0", 37, "PlainModule")
    }
}

static GREEDY: ModuleDescriptor = ModuleDescriptor {
    manifest: greedy_manifest,
    entrypoint: "PlainModule",
    constructor: plain_constructor,
    provided_hooks: HookFlags::NONE,
    handler_methods: &[],
};

fn confused_manifest() -> ModuleManifest {
    ModuleManifest {
        capabilities: CapabilityRequest {
            requires: vec!["telepathy".to_owned()],
            optional: vec![],
        },
        ..ModuleManifest::minimal("confused", "1.0.0", 37, "PlainModule")
    }
}

static CONFUSED: ModuleDescriptor = ModuleDescriptor {
    manifest: confused_manifest,
    entrypoint: "PlainModule",
    constructor: plain_constructor,
    provided_hooks: HookFlags::NONE,
    handler_methods: &[],
};

fn catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog.insert(&PLAIN);
    catalog.insert(&FREE);
    catalog.insert(&GREEDY);
    catalog.insert(&CONFUSED);
    catalog
}

fn load_action(name: &str) -> Action {
    let mut payload = Map::new();
    payload.insert("module".to_owned(), Value::from(name));
    Action::new("load.module", payload, "tests")
}

fn run_action(name: &str) -> Action {
    let mut payload = Map::new();
    payload.insert("module".to_owned(), Value::from(name));
    Action::new("run.module", payload, "tests")
}

#[test]
fn run_without_module_run_capability_is_denied() {
    let root = tempfile::tempdir().unwrap();
    // Harness configuration: the implicit module.run grant is disabled.
    let config = RuntimeConfig::new(root.path()).with_grant_module_run(false);
    let runtime = ExecutionOrchestrator::with_catalog(config, catalog()).unwrap();

    assert!(runtime.execute(&load_action("plain")).ok);

    let before = RUN_CALLS.load(Ordering::SeqCst);
    let envelope = runtime.execute(&run_action("plain"));
    assert!(!envelope.ok);
    assert_eq!(envelope.status.as_deref(), Some("capability_denied"));
    // run() was never invoked.
    assert_eq!(RUN_CALLS.load(Ordering::SeqCst), before);
}

#[test]
fn module_run_is_granted_implicitly_by_default() {
    let root = tempfile::tempdir().unwrap();
    let runtime =
        ExecutionOrchestrator::with_catalog(RuntimeConfig::new(root.path()), catalog()).unwrap();

    let envelope = runtime.execute(&load_action("free"));
    assert!(envelope.ok);
    assert!(envelope.data.unwrap()["capabilities_granted"]
        .as_array()
        .unwrap()
        .contains(&json!("module.run")));
    assert!(runtime.execute(&run_action("free")).ok);
}

#[test]
fn restricted_capability_fails_the_load() {
    let root = tempfile::tempdir().unwrap();
    let runtime =
        ExecutionOrchestrator::with_catalog(RuntimeConfig::new(root.path()), catalog()).unwrap();

    let envelope = runtime.execute(&load_action("greedy"));
    assert!(!envelope.ok);
    assert!(envelope.error.unwrap().contains("restricted"));
    // The module never reached the registry.
    assert!(runtime.loader().registry().get("greedy").is_none());
}

#[test]
fn unknown_capability_fails_the_load() {
    let root = tempfile::tempdir().unwrap();
    let runtime =
        ExecutionOrchestrator::with_catalog(RuntimeConfig::new(root.path()), catalog()).unwrap();

    let envelope = runtime.execute(&load_action("confused"));
    assert!(!envelope.ok);
    assert!(envelope.error.unwrap().contains("unknown capability"));
}

#[test]
fn loading_an_unregistered_module_fails() {
    let root = tempfile::tempdir().unwrap();
    let runtime =
        ExecutionOrchestrator::with_catalog(RuntimeConfig::new(root.path()), catalog()).unwrap();

    let envelope = runtime.execute(&load_action("phantom"));
    assert!(!envelope.ok);
    assert!(envelope.error.unwrap().contains("not present in the catalog"));
}
