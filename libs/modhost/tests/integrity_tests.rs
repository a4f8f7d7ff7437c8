//! End-to-end: integrity modes drive module status and run eligibility.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use modhost::capability::CapabilityMap;
use modhost::manifest::HookFlags;
use modhost::{
    Action, ExecutionOrchestrator, IntegrityMode, ModuleCatalog, ModuleCtx, ModuleDescriptor,
    ModuleEntrypoint, ModuleManifest, ModuleState, ModuleStatus, RunOutcome, RuntimeConfig,
};
use serde_json::{json, Map, Value};

struct SealedModule;

impl ModuleEntrypoint for SealedModule {
    fn run(&self, _payload: &Map<String, Value>) -> anyhow::Result<RunOutcome> {
        Ok(RunOutcome::Value(json!({"ok": true})))
    }
}

fn sealed_manifest() -> ModuleManifest {
    ModuleManifest::minimal("sealed", "1.0.0", 45, "SealedModule")
}

fn sealed_constructor(
    _ctx: ModuleCtx,
    _caps: CapabilityMap,
    _state: Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>> {
    Ok(Arc::new(SealedModule))
}

static SEALED: ModuleDescriptor = ModuleDescriptor {
    manifest: sealed_manifest,
    entrypoint: "SealedModule",
    constructor: sealed_constructor,
    provided_hooks: HookFlags::NONE,
    handler_methods: &[],
};

fn runtime(data_root: &std::path::Path, mode: IntegrityMode) -> ExecutionOrchestrator {
    let mut catalog = ModuleCatalog::new();
    catalog.insert(&SEALED);
    ExecutionOrchestrator::with_catalog(
        RuntimeConfig::new(data_root).with_integrity(mode),
        catalog,
    )
    .unwrap()
}

fn load_action() -> Action {
    let mut payload = Map::new();
    payload.insert("module".to_owned(), Value::from("sealed"));
    Action::new("load.module", payload, "tests")
}

fn run_action() -> Action {
    let mut payload = Map::new();
    payload.insert("module".to_owned(), Value::from("sealed"));
    Action::new("run.module", payload, "tests")
}

#[test]
fn auto_baseline_blocks_first_load_then_verifies() {
    let root = tempfile::tempdir().unwrap();

    // First sight: a baseline is created, the module registers blocked.
    let envelope = runtime(root.path(), IntegrityMode::AutoBaseline).execute(&load_action());
    assert!(envelope.ok);
    let data = envelope.data.unwrap();
    assert_eq!(data["integrity_status"], json!("baseline_created"));

    // Second runtime over the same data root verifies against the stored
    // baseline and the module becomes runnable.
    let rt = runtime(root.path(), IntegrityMode::AutoBaseline);
    let envelope = rt.execute(&load_action());
    assert_eq!(
        envelope.data.unwrap()["integrity_status"],
        json!("verified")
    );
    assert_eq!(
        rt.loader().registry().get("sealed").unwrap().status,
        ModuleStatus::Loaded
    );
    assert!(rt.execute(&run_action()).ok);
}

#[test]
fn baseline_created_module_cannot_run() {
    let root = tempfile::tempdir().unwrap();
    let rt = runtime(root.path(), IntegrityMode::AutoBaseline);

    assert!(rt.execute(&load_action()).ok);
    let entry = rt.loader().registry().get("sealed").unwrap();
    assert_eq!(entry.status, ModuleStatus::Blocked);

    let envelope = rt.execute(&run_action());
    assert!(!envelope.ok);
    assert_eq!(envelope.status.as_deref(), Some("not_loaded"));
}

#[test]
fn tampered_baseline_is_a_violation() {
    let root = tempfile::tempdir().unwrap();
    assert!(runtime(root.path(), IntegrityMode::AutoBaseline)
        .execute(&load_action())
        .ok);

    // Corrupt the recorded fingerprint.
    let baseline = root.path().join("integrity").join("sealed.json");
    let mut entry: Value =
        serde_json::from_str(&std::fs::read_to_string(&baseline).unwrap()).unwrap();
    entry["fingerprint"] = json!("0000deadbeef");
    std::fs::write(&baseline, serde_json::to_string_pretty(&entry).unwrap()).unwrap();

    let rt = runtime(root.path(), IntegrityMode::AutoBaseline);
    let envelope = rt.execute(&load_action());
    assert!(!envelope.ok);
    assert!(envelope.error.unwrap().contains("integrity violation"));

    // The module registered as blocked without an instance.
    let entry = rt.loader().registry().get("sealed").unwrap();
    assert_eq!(entry.status, ModuleStatus::Blocked);
    assert!(entry.instance.is_none());
    assert!(entry.capabilities.is_empty());

    let envelope = rt.execute(&run_action());
    assert!(!envelope.ok);
    assert_eq!(envelope.status.as_deref(), Some("capability_denied"));
}

#[test]
fn strict_mode_refuses_unknown_modules() {
    let root = tempfile::tempdir().unwrap();
    let rt = runtime(root.path(), IntegrityMode::Strict);

    let envelope = rt.execute(&load_action());
    assert!(!envelope.ok);
    assert_eq!(
        rt.loader().registry().get("sealed").unwrap().status,
        ModuleStatus::Blocked
    );
}

#[test]
fn integrity_off_always_verifies() {
    let root = tempfile::tempdir().unwrap();
    let rt = runtime(root.path(), IntegrityMode::Off);

    let envelope = rt.execute(&load_action());
    assert_eq!(
        envelope.data.unwrap()["integrity_status"],
        json!("verified")
    );
    assert!(rt.execute(&run_action()).ok);
}
