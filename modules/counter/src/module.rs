use std::sync::Arc;

use modhost::capability::CapabilityMap;
use modhost::manifest::HookFlags;
use modhost::{
    ModuleCtx, ModuleDescriptor, ModuleEntrypoint, ModuleManifest, ModuleState, RunOutcome,
};
use serde_json::{json, Map, Value};

fn manifest() -> ModuleManifest {
    let mut default_state = Map::new();
    default_state.insert("counter".to_owned(), json!(0));
    default_state.insert("last_run".to_owned(), Value::Null);

    ModuleManifest {
        capabilities: modhost::CapabilityRequest {
            requires: vec![
                "log.basic".to_owned(),
                "storage.read".to_owned(),
                "storage.write".to_owned(),
                "time".to_owned(),
            ],
            optional: vec![],
        },
        hooks: HookFlags::ALL,
        default_state,
        ..ModuleManifest::minimal("counter", "1.2.0", 40, "CounterModule")
    }
}

/// Increments a persisted counter on every run.
pub struct CounterModule {
    ctx: ModuleCtx,
    caps: CapabilityMap,
    state: Arc<ModuleState>,
}

fn construct(
    ctx: ModuleCtx,
    caps: CapabilityMap,
    state: Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>> {
    Ok(Arc::new(CounterModule { ctx, caps, state }))
}

impl CounterModule {
    fn log(&self, message: &str) {
        if let Some(log) = self.caps.log() {
            log.info(message);
        }
    }
}

impl ModuleEntrypoint for CounterModule {
    fn init(&self) -> anyhow::Result<()> {
        self.log("counter module initialized");
        Ok(())
    }

    fn pre_run(&self, payload: &Map<String, Value>) -> anyhow::Result<()> {
        tracing::debug!(
            module = self.ctx.module_name(),
            keys = payload.len(),
            "pre_run"
        );
        Ok(())
    }

    fn run(&self, _payload: &Map<String, Value>) -> anyhow::Result<RunOutcome> {
        let value = self
            .state
            .get("counter")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + 1;

        self.state.set("counter", value)?;
        if let Some(time) = self.caps.time() {
            self.state.set("last_run", time.now_rfc3339())?;
        }

        self.log(&format!("counter is now {value}"));
        Ok(RunOutcome::Value(json!({ "ok": true, "value": value })))
    }

    fn post_run(&self, result: &Value) -> anyhow::Result<()> {
        tracing::debug!(
            module = self.ctx.module_name(),
            value = result.get("value").and_then(serde_json::Value::as_i64),
            "post_run"
        );
        Ok(())
    }

    fn on_error(&self, error: &anyhow::Error) -> anyhow::Result<()> {
        self.state.set("last_error", error.to_string())?;
        Ok(())
    }
}

inventory::submit! {
    ModuleDescriptor {
        manifest,
        entrypoint: "CounterModule",
        constructor: construct,
        provided_hooks: HookFlags::ALL,
        handler_methods: &[],
    }
}
