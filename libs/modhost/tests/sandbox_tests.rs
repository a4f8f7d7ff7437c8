//! End-to-end: a module's storage capability cannot escape its sandbox.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use modhost::capability::CapabilityMap;
use modhost::manifest::{CapabilityRequest, HookFlags};
use modhost::storage::StorageError;
use modhost::{
    Action, ExecutionOrchestrator, ModuleCatalog, ModuleCtx, ModuleDescriptor, ModuleEntrypoint,
    ModuleManifest, ModuleState, RunOutcome,
};
use serde_json::{Map, Value};

struct VaultModule;

impl ModuleEntrypoint for VaultModule {
    fn run(&self, _payload: &Map<String, Value>) -> anyhow::Result<RunOutcome> {
        Ok(RunOutcome::Value(Value::Null))
    }
}

fn vault_manifest() -> ModuleManifest {
    ModuleManifest {
        capabilities: CapabilityRequest {
            requires: vec!["storage.read".to_owned(), "storage.write".to_owned()],
            optional: vec![],
        },
        ..ModuleManifest::minimal("vault", "1.0.0", 38, "VaultModule")
    }
}

fn vault_constructor(
    _ctx: ModuleCtx,
    _caps: CapabilityMap,
    _state: Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>> {
    Ok(Arc::new(VaultModule))
}

static VAULT: ModuleDescriptor = ModuleDescriptor {
    manifest: vault_manifest,
    entrypoint: "VaultModule",
    constructor: vault_constructor,
    provided_hooks: HookFlags::NONE,
    handler_methods: &[],
};

fn loaded_runtime(data_root: &std::path::Path) -> ExecutionOrchestrator {
    let mut catalog = ModuleCatalog::new();
    catalog.insert(&VAULT);
    let runtime = ExecutionOrchestrator::with_catalog(
        modhost::RuntimeConfig::new(data_root),
        catalog,
    )
    .unwrap();

    let mut payload = Map::new();
    payload.insert("module".to_owned(), Value::from("vault"));
    let envelope = runtime.execute(&Action::new("load.module", payload, "tests"));
    assert!(envelope.ok, "load failed: {:?}", envelope.error);
    runtime
}

#[test]
fn traversal_reads_are_refused() {
    let root = tempfile::tempdir().unwrap();
    let runtime = loaded_runtime(root.path());

    let entry = runtime.loader().registry().get("vault").unwrap();
    let reader = entry.capabilities.storage_read().unwrap();

    let err = reader.read_text("../../etc/passwd").unwrap_err();
    assert!(matches!(err, StorageError::PathNotPermitted { .. }));

    let err = reader.read_text("/etc/passwd").unwrap_err();
    assert!(matches!(err, StorageError::PathNotPermitted { .. }));
}

#[test]
fn traversal_writes_are_refused() {
    let root = tempfile::tempdir().unwrap();
    let runtime = loaded_runtime(root.path());

    let entry = runtime.loader().registry().get("vault").unwrap();
    let writer = entry.capabilities.storage_write().unwrap();

    let err = writer.write_text("../outside.txt", "leak").unwrap_err();
    assert!(matches!(err, StorageError::PathNotPermitted { .. }));
    assert!(!root.path().join("outside.txt").exists());
}

#[cfg(unix)]
#[test]
fn symlink_escape_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let secret_dir = tempfile::tempdir().unwrap();
    let secret = secret_dir.path().join("passwd");
    std::fs::write(&secret, "root:x:0:0").unwrap();

    let runtime = loaded_runtime(root.path());
    let entry = runtime.loader().registry().get("vault").unwrap();
    let reader = entry.capabilities.storage_read().unwrap();
    let writer = entry.capabilities.storage_write().unwrap();

    // A symlink created inside the sandbox pointing at the secret.
    let sandbox = root.path().join("modules").join("vault");
    std::os::unix::fs::symlink(&secret, sandbox.join("escape.txt")).unwrap();

    let err = reader.read_text("escape.txt").unwrap_err();
    assert!(matches!(err, StorageError::PathNotPermitted { .. }));

    // Writing through the symlink must not touch the target either.
    let err = writer.write_text("escape.txt", "overwritten").unwrap_err();
    assert!(matches!(err, StorageError::PathNotPermitted { .. }));
    assert_eq!(std::fs::read_to_string(&secret).unwrap(), "root:x:0:0");
}

#[test]
fn sandboxed_io_works_inside_the_root() {
    let root = tempfile::tempdir().unwrap();
    let runtime = loaded_runtime(root.path());

    let entry = runtime.loader().registry().get("vault").unwrap();
    let reader = entry.capabilities.storage_read().unwrap();
    let writer = entry.capabilities.storage_write().unwrap();

    writer.write_text("notes/today.txt", "all quiet").unwrap();
    assert_eq!(reader.read_text("notes/today.txt").unwrap(), "all quiet");
    assert!(reader.exists("notes/today.txt"));

    let files = reader.list_files("").unwrap();
    assert!(files.contains(&"notes/today.txt".to_owned()));
    // State container lives in the same sandbox.
    assert!(reader.base_path().contains("vault"));
}
