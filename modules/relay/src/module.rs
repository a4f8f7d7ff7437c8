use std::sync::Arc;

use modhost::async_exec::yield_now;
use modhost::capability::CapabilityMap;
use modhost::events::EventContext;
use modhost::manifest::HookFlags;
use modhost::{
    ModuleCtx, ModuleDescriptor, ModuleEntrypoint, ModuleManifest, ModuleState, RunOutcome,
};
use serde_json::{json, Map, Value};

/// Chain depth at which `on_chain` stops republishing.
const MAX_CHAIN_LEVEL: u64 = 3;

fn manifest() -> ModuleManifest {
    let mut default_state = Map::new();
    default_state.insert("chained".to_owned(), json!(0));

    let mut reactive = modhost::ReactiveSpec {
        enabled: true,
        handlers: std::collections::BTreeMap::new(),
    };
    reactive
        .handlers
        .insert("relay.chain".to_owned(), "on_chain".to_owned());

    ModuleManifest {
        capabilities: modhost::CapabilityRequest {
            requires: vec!["log.basic".to_owned(), "event.publish".to_owned()],
            optional: vec!["async.schedule".to_owned()],
        },
        hooks: HookFlags {
            init: true,
            pre_run: false,
            post_run: false,
            on_error: false,
        },
        default_state,
        reactive,
        ..ModuleManifest::minimal("relay", "1.1.0", 42, "RelayModule")
    }
}

/// Republishes `relay.chain` with an incremented level until the chain
/// depth bound, and answers `run` with a suspendable echo.
pub struct RelayModule {
    ctx: ModuleCtx,
    caps: CapabilityMap,
    state: Arc<ModuleState>,
}

fn construct(
    ctx: ModuleCtx,
    caps: CapabilityMap,
    state: Arc<ModuleState>,
) -> anyhow::Result<Arc<dyn ModuleEntrypoint>> {
    Ok(Arc::new(RelayModule { ctx, caps, state }))
}

impl RelayModule {
    fn on_chain(&self, ctx: &EventContext) -> anyhow::Result<Value> {
        let level = ctx
            .payload
            .get("level")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let chained = self
            .state
            .get("chained")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        self.state.set("chained", chained)?;
        // Handlers that mutate state save explicitly; only run-path
        // mutations are auto-saved by the orchestrator.
        if let Err(e) = self.state.save() {
            tracing::warn!(module = self.ctx.module_name(), error = %e, "chain state save failed");
        }

        if let Some(log) = self.caps.log() {
            log.debug(&format!("chain level {level}, total {chained}"));
        }

        if level < MAX_CHAIN_LEVEL {
            if let Some(publisher) = self.caps.event_publish() {
                let mut payload = Map::new();
                payload.insert("level".to_owned(), json!(level + 1));
                publisher.publish("relay.chain", payload);
            }
        }

        Ok(json!({ "level": level, "chained": chained }))
    }
}

impl ModuleEntrypoint for RelayModule {
    fn init(&self) -> anyhow::Result<()> {
        if let Some(log) = self.caps.log() {
            log.info("relay module initialized");
        }
        Ok(())
    }

    fn run(&self, payload: &Map<String, Value>) -> anyhow::Result<RunOutcome> {
        let echo = payload.clone();
        Ok(RunOutcome::Async(Box::pin(async move {
            yield_now().await;
            Ok(json!({ "ok": true, "echoed": echo }))
        })))
    }

    fn invoke_handler(&self, method: &str, ctx: &EventContext) -> anyhow::Result<Value> {
        match method {
            "on_chain" => self.on_chain(ctx),
            other => anyhow::bail!("unknown handler method: {other}"),
        }
    }
}

inventory::submit! {
    ModuleDescriptor {
        manifest,
        entrypoint: "RelayModule",
        constructor: construct,
        provided_hooks: HookFlags {
            init: true,
            pre_run: false,
            post_run: false,
            on_error: false,
        },
        handler_methods: &["on_chain"],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use modhost::contracts::RuntimeState;
    use modhost::ModuleStorage;

    fn instance(root: &std::path::Path) -> Arc<dyn ModuleEntrypoint> {
        let m = manifest();
        let storage = Arc::new(ModuleStorage::new(root, &m.name).unwrap());
        let state = Arc::new(ModuleState::load(
            &m.name,
            m.state_version,
            storage,
            m.default_state.clone(),
        ));
        let ctx = ModuleCtx::new(&m.name, Arc::new(RuntimeState::default()));
        construct(ctx, CapabilityMap::default(), state).unwrap()
    }

    #[test]
    fn manifest_declares_the_reactive_handler() {
        let m = manifest();
        assert!(m.has_reactive());
        assert_eq!(m.reactive.handlers.get("relay.chain").unwrap(), "on_chain");
    }

    #[test]
    fn chain_handler_counts_invocations() {
        let root = tempfile::tempdir().unwrap();
        let module = instance(root.path());

        // Without an event.publish capability the handler still counts, it
        // just cannot republish.
        let mut payload = Map::new();
        payload.insert("level".to_owned(), json!(0));
        let ctx = EventContext::new("relay.chain", "tests", payload);

        let result = module.invoke_handler("on_chain", &ctx).unwrap();
        assert_eq!(result["chained"], json!(1));

        let err = module.invoke_handler("nope", &ctx).unwrap_err();
        assert!(err.to_string().contains("unknown handler"));
    }

    #[test]
    fn run_is_suspendable() {
        let root = tempfile::tempdir().unwrap();
        let module = instance(root.path());
        match module.run(&Map::new()).unwrap() {
            RunOutcome::Async(_) => {}
            RunOutcome::Value(_) => panic!("relay runs asynchronously"),
        }
    }
}
