//! Execution orchestrator: the single entrypoint for external actions.
//!
//! Every `execute` call first pulses the scheduler and the async manager,
//! making them cooperative passengers on the external call schedule, then
//! dispatches the action to its handler. Nothing escapes the orchestrator
//! boundary: failures come back as `{ok:false, error}` envelopes.

use std::error::Error as StdError;

use serde_json::{json, Map, Value};

use crate::action::{Action, ResultEnvelope};
use crate::async_exec::TaskFuture;
use crate::contracts::{LifecycleStage, ModuleCatalog, RunOutcome};
use crate::loader::{LoadError, ModuleLoader, RuntimeConfig};
use crate::registry::{ModuleEntry, ModuleStatus};

/// Render an error with its source chain, `outer: cause: root` style.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

enum RunProgress {
    Value(Value),
    Suspended(TaskFuture),
}

/// Routes external actions to the loader, the registry, and loaded module
/// instances.
pub struct ExecutionOrchestrator {
    loader: ModuleLoader,
}

impl ExecutionOrchestrator {
    /// Build a runtime over every module registered at link time.
    ///
    /// # Errors
    /// See [`ModuleLoader::new`].
    pub fn new(config: RuntimeConfig) -> Result<Self, LoadError> {
        Self::with_catalog(config, ModuleCatalog::discover())
    }

    /// Build a runtime over an explicit catalog (test harnesses).
    ///
    /// # Errors
    /// See [`ModuleLoader::new`].
    pub fn with_catalog(config: RuntimeConfig, catalog: ModuleCatalog) -> Result<Self, LoadError> {
        Ok(Self {
            loader: ModuleLoader::new(config, catalog)?,
        })
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Execute one action and return its result envelope.
    pub fn execute(&self, action: &Action) -> ResultEnvelope {
        tracing::info!(
            action_type = %action.action_type,
            source = %action.source,
            "Executing action"
        );

        // Cooperative pulse: both managers make progress on every external
        // action, before the action itself runs.
        self.loader.scheduler().tick(None);
        self.loader.async_manager().tick(None);

        match action.action_type.as_str() {
            "run.module" => self.handle_run_module(action),
            "query.status" => self.handle_query_status(action),
            "execute.task" => self.handle_execute_task(action),
            "load.module" => self.handle_load_module(action),
            "list.modules" => self.handle_list_modules(action),
            other => ResultEnvelope::failure(other, &format!("Unknown action: {other}")),
        }
    }

    // -----------------------------------------------------------------
    // run.module
    // -----------------------------------------------------------------

    fn handle_run_module(&self, action: &Action) -> ResultEnvelope {
        let action_type = &action.action_type;
        let Some(module) = action.payload.get("module").and_then(Value::as_str) else {
            return ResultEnvelope::failure(action_type, "Missing 'module' in payload");
        };

        // Capability enforcement comes first; a module that was never
        // registered holds no capabilities, so it is denied here too.
        if !self.loader.registry().has_capability(module, "module.run") {
            tracing::warn!(module, "Execution denied: missing module.run");
            return ResultEnvelope::denied(
                action_type,
                "capability_denied",
                &format!("Module '{module}' lacks module.run capability"),
            );
        }

        let Some(entry) = self.loader.registry().get(module) else {
            return ResultEnvelope::denied(
                action_type,
                "not_loaded",
                &format!("Module '{module}' is not loaded"),
            );
        };

        if entry.status != ModuleStatus::Loaded {
            return ResultEnvelope::denied(
                action_type,
                "not_loaded",
                &format!("Module '{module}' is blocked (integrity: {})", entry.integrity_status),
            );
        }

        let Some(instance) = entry.instance.clone() else {
            return ResultEnvelope::denied(
                action_type,
                "not_loaded",
                &format!("Module '{module}' has no instance"),
            );
        };

        // Load the latest persisted state before execution.
        if let Some(state) = &entry.state {
            state.refresh();
        }

        let runtime = self.loader.runtime_state().clone();
        let hooks = entry.manifest.hooks;

        let progress: anyhow::Result<RunProgress> = (|| {
            if hooks.pre_run {
                runtime.set_stage(LifecycleStage::PreRun);
                instance.pre_run(&action.payload)?;
            }

            runtime.set_stage(LifecycleStage::Run);
            match instance.run(&action.payload)? {
                RunOutcome::Async(future) => Ok(RunProgress::Suspended(future)),
                RunOutcome::Value(value) => {
                    if hooks.post_run {
                        runtime.set_stage(LifecycleStage::PostRun);
                        instance.post_run(&value)?;
                    }
                    Ok(RunProgress::Value(value))
                }
            }
        })();

        match progress {
            Ok(RunProgress::Value(value)) => {
                self.save_state(&entry);
                runtime.set_stage(LifecycleStage::Idle);
                tracing::info!(module, "Module executed");
                ResultEnvelope::success(action_type, value)
            }
            Ok(RunProgress::Suspended(future)) => {
                self.save_state(&entry);
                runtime.set_stage(LifecycleStage::Idle);

                let mut metadata = Map::new();
                metadata.insert("action_type".to_owned(), Value::from(action_type.clone()));
                metadata.insert("source".to_owned(), Value::from(action.source.clone()));
                metadata.insert("module".to_owned(), Value::from(module));

                match self.loader.async_manager().create_task(future, metadata) {
                    Some(task_id) => {
                        tracing::info!(module, task_id, "Module run suspended");
                        ResultEnvelope::pending(action_type, &task_id)
                    }
                    None => ResultEnvelope::failure(action_type, "async task queue full"),
                }
            }
            Err(error) => {
                tracing::error!(module, error = %error, "Module run failed");

                if hooks.on_error {
                    runtime.set_stage(LifecycleStage::OnError);
                    if let Err(hook_error) = instance.on_error(&error) {
                        tracing::warn!(module, error = %hook_error, "on_error hook failed");
                    }
                }

                // Error bookkeeping done inside on_error must persist.
                self.save_state(&entry);
                runtime.set_stage(LifecycleStage::Idle);
                ResultEnvelope::failure(action_type, &error.to_string())
            }
        }
    }

    fn save_state(&self, entry: &ModuleEntry) {
        if let Some(state) = &entry.state {
            if let Err(e) = state.save() {
                tracing::warn!(
                    module = %entry.manifest.name,
                    error = %error_chain(&e),
                    "State save failed"
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // query.status
    // -----------------------------------------------------------------

    fn handle_query_status(&self, action: &Action) -> ResultEnvelope {
        let registry = self.loader.registry();
        let names = registry.names();

        let data = json!({
            "runtime": "modhost",
            "status": "ok",
            "source": action.source,
            "module_count": names.len(),
            "loaded_modules": names,
            "scheduler": self.loader.scheduler().stats(),
            "async": self.loader.async_manager().stats(),
            "event_types": self.loader.event_bus().event_types(),
        });
        ResultEnvelope::success(&action.action_type, data)
    }

    // -----------------------------------------------------------------
    // execute.task
    // -----------------------------------------------------------------

    fn handle_execute_task(&self, action: &Action) -> ResultEnvelope {
        let Some(task_name) = action.payload.get("task_name").and_then(Value::as_str) else {
            return ResultEnvelope::failure(&action.action_type, "Missing 'task_name' in payload");
        };

        tracing::info!(task_name, "Executing named task");
        ResultEnvelope::success(
            &action.action_type,
            json!({
                "message": format!("Executed task: {task_name}"),
                "result": "success",
            }),
        )
    }

    // -----------------------------------------------------------------
    // load.module
    // -----------------------------------------------------------------

    fn handle_load_module(&self, action: &Action) -> ResultEnvelope {
        // `module` is the documented key; `path` is accepted for callers
        // still passing file paths, whose stem is the descriptor name.
        let name = action
            .payload
            .get("module")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                action
                    .payload
                    .get("path")
                    .and_then(Value::as_str)
                    .map(|p| {
                        std::path::Path::new(p)
                            .file_stem()
                            .map_or_else(|| p.to_owned(), |s| s.to_string_lossy().into_owned())
                    })
            });

        let Some(name) = name else {
            return ResultEnvelope::failure(
                &action.action_type,
                "Missing 'module' (or 'path') in payload",
            );
        };

        match self.loader.load(&name) {
            Ok(report) => ResultEnvelope::success(
                &action.action_type,
                serde_json::to_value(&report).unwrap_or(Value::Null),
            ),
            Err(error) => ResultEnvelope::failure(&action.action_type, &error_chain(&error)),
        }
    }

    // -----------------------------------------------------------------
    // list.modules
    // -----------------------------------------------------------------

    fn handle_list_modules(&self, action: &Action) -> ResultEnvelope {
        let registry = self.loader.registry();
        let mut modules = Vec::new();

        for name in registry.names() {
            if let Some(entry) = registry.get(&name) {
                modules.push(json!({
                    "name": name,
                    "status": entry.status,
                    "version": entry.manifest.version,
                    "phase": entry.manifest.phase,
                    "capabilities": entry.capabilities.names(),
                }));
            }
        }

        ResultEnvelope::success(
            &action.action_type,
            json!({
                "count": modules.len(),
                "modules": modules,
            }),
        )
    }
}
