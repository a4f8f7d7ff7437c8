//! Capability proxy objects and the manager that binds them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::async_exec::{AsyncTaskManager, TaskFuture};
use crate::capability::registry::{CapabilityError, CapabilityRegistry};
use crate::clock;
use crate::events::{EventBus, EventContext, HandlerId, PublishOutcome, SyncHandlerFn};
use crate::manifest::ModuleManifest;
use crate::scheduler::{EventTaskFn, Scheduler, TimedTaskFn};
use crate::storage::{ModuleStorage, StorageError};

/// `log.basic` / `log.advanced`: a logger bound to the module name.
#[derive(Clone)]
pub struct LogProxy {
    module: Arc<str>,
    advanced: bool,
}

impl LogProxy {
    fn new(module: &str, advanced: bool) -> Self {
        Self {
            module: Arc::from(module),
            advanced,
        }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(module = %self.module, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(module = %self.module, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(module = %self.module, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(module = %self.module, "{message}");
    }

    /// Structured variant; metadata is ignored unless the advanced
    /// capability was granted.
    pub fn info_with(&self, message: &str, metadata: &Map<String, Value>) {
        if self.advanced {
            tracing::info!(module = %self.module, metadata = %(serde_json::Value::Object(metadata.clone())), "{message}");
        } else {
            tracing::info!(module = %self.module, "{message}");
        }
    }
}

/// `storage.read`: read-only slice of the module sandbox.
#[derive(Clone)]
pub struct StorageReadProxy {
    storage: Arc<ModuleStorage>,
}

impl StorageReadProxy {
    /// # Errors
    /// See [`ModuleStorage::read_text`].
    pub fn read_text(&self, path: &str) -> Result<String, StorageError> {
        self.storage.read_text(path)
    }

    /// # Errors
    /// See [`ModuleStorage::read_json`].
    pub fn read_json(&self, path: &str) -> Result<Value, StorageError> {
        self.storage.read_json(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.storage.exists(path)
    }

    /// # Errors
    /// See [`ModuleStorage::list_files`].
    pub fn list_files(&self, path: &str) -> Result<Vec<String>, StorageError> {
        self.storage.list_files(path)
    }

    pub fn base_path(&self) -> String {
        self.storage.base_path().display().to_string()
    }
}

/// `storage.write`: write access to the module sandbox.
#[derive(Clone)]
pub struct StorageWriteProxy {
    storage: Arc<ModuleStorage>,
}

impl StorageWriteProxy {
    /// # Errors
    /// See [`ModuleStorage::write_text`].
    pub fn write_text(&self, path: &str, data: &str) -> Result<(), StorageError> {
        self.storage.write_text(path, data)
    }

    /// # Errors
    /// See [`ModuleStorage::write_json`].
    pub fn write_json(&self, path: &str, value: &Value) -> Result<(), StorageError> {
        self.storage.write_json(path, value)
    }
}

/// `network`: bounded outbound HTTP.
#[derive(Clone, Default)]
pub struct NetworkProxy;

impl NetworkProxy {
    /// Fetch a URL as text with a 10 second timeout.
    ///
    /// # Errors
    /// Transport or non-2xx responses surface as errors.
    pub fn http_get(&self, url: &str) -> anyhow::Result<String> {
        let response = ureq::get(url).timeout(Duration::from_secs(10)).call()?;
        Ok(response.into_string()?)
    }
}

/// `crypto`: digest helpers.
#[derive(Clone, Default)]
pub struct CryptoProxy;

impl CryptoProxy {
    pub fn sha256_hex(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

/// `time`: clock access.
#[derive(Clone, Default)]
pub struct TimeProxy;

impl TimeProxy {
    /// Fractional epoch seconds.
    pub fn epoch(&self) -> f64 {
        clock::now()
    }

    /// Current UTC time as an RFC 3339 string.
    pub fn now_rfc3339(&self) -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

/// `event.publish`: publish events under the module's name.
#[derive(Clone)]
pub struct EventPublishProxy {
    bus: Arc<EventBus>,
    module: Arc<str>,
}

impl EventPublishProxy {
    pub fn publish(&self, event_type: &str, payload: Map<String, Value>) -> Vec<PublishOutcome> {
        let ctx = EventContext::new(event_type, &self.module, payload);
        self.bus.publish(event_type, &ctx)
    }

    pub fn publish_ctx(&self, ctx: &EventContext) -> Vec<PublishOutcome> {
        self.bus.publish(&ctx.event_type, ctx)
    }
}

/// `event.subscribe`: manual subscription, e.g. from an `init` hook.
#[derive(Clone)]
pub struct EventSubscribeProxy {
    bus: Arc<EventBus>,
    module: Arc<str>,
}

impl EventSubscribeProxy {
    pub fn subscribe(&self, event_type: &str, handler: Arc<SyncHandlerFn>) -> HandlerId {
        let name = format!("{}::manual", self.module);
        self.bus.subscribe_sync(event_type, &name, handler)
    }

    pub fn unsubscribe(&self, event_type: &str, id: HandlerId) -> bool {
        self.bus.unsubscribe(event_type, id)
    }
}

/// `task.schedule.interval`.
#[derive(Clone)]
pub struct TaskScheduleIntervalProxy {
    scheduler: Arc<Scheduler>,
}

impl TaskScheduleIntervalProxy {
    pub fn schedule(
        &self,
        callable: Arc<TimedTaskFn>,
        interval: f64,
        metadata: Map<String, Value>,
    ) -> String {
        self.scheduler.schedule_interval(callable, interval, metadata)
    }
}

/// `task.schedule.oneshot`.
#[derive(Clone)]
pub struct TaskScheduleOneshotProxy {
    scheduler: Arc<Scheduler>,
}

impl TaskScheduleOneshotProxy {
    pub fn schedule(
        &self,
        callable: Arc<TimedTaskFn>,
        delay: f64,
        metadata: Map<String, Value>,
    ) -> String {
        self.scheduler.schedule_oneshot(callable, delay, metadata)
    }
}

/// `task.schedule.event`.
#[derive(Clone)]
pub struct TaskScheduleEventProxy {
    scheduler: Arc<Scheduler>,
}

impl TaskScheduleEventProxy {
    pub fn schedule(
        &self,
        event_type: &str,
        callable: Arc<EventTaskFn>,
        metadata: Map<String, Value>,
    ) -> String {
        self.scheduler.schedule_event(event_type, callable, metadata)
    }
}

/// `task.cancel`.
#[derive(Clone)]
pub struct TaskCancelProxy {
    scheduler: Arc<Scheduler>,
}

impl TaskCancelProxy {
    pub fn cancel(&self, task_id: &str) -> bool {
        self.scheduler.cancel(task_id)
    }
}

/// `async.schedule`: queue suspendable work.
#[derive(Clone)]
pub struct AsyncScheduleProxy {
    manager: Arc<AsyncTaskManager>,
}

impl AsyncScheduleProxy {
    /// Returns `None` when the pending queue is full.
    pub fn schedule(&self, future: TaskFuture, metadata: Map<String, Value>) -> Option<String> {
        self.manager.create_task(future, metadata)
    }
}

/// Result of polling or waiting on an async task.
#[derive(Clone, Debug, Serialize)]
pub struct AwaitReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub is_done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `async.await`: poll or cooperatively wait for async task results.
#[derive(Clone)]
pub struct AsyncAwaitProxy {
    manager: Arc<AsyncTaskManager>,
}

impl AsyncAwaitProxy {
    pub fn poll(&self, task_id: &str) -> AwaitReport {
        match self.manager.get(task_id) {
            Some(view) => AwaitReport {
                ok: true,
                task_id: Some(view.id),
                status: Some(view.status.to_string()),
                is_done: view.is_done,
                result: view.result,
                error: view.error,
            },
            None => AwaitReport {
                ok: false,
                task_id: Some(task_id.to_owned()),
                status: None,
                is_done: false,
                result: None,
                error: Some("task not found".to_owned()),
            },
        }
    }

    /// Drive manager ticks until the task finishes or `timeout` seconds
    /// elapse. A timeout does not cancel the task.
    pub fn wait(&self, task_id: &str, timeout: f64) -> AwaitReport {
        let deadline = clock::now() + timeout;
        loop {
            let report = self.poll(task_id);
            if report.is_done || !report.ok {
                return report;
            }
            if clock::now() >= deadline {
                return AwaitReport {
                    ok: false,
                    task_id: Some(task_id.to_owned()),
                    status: Some("timeout".to_owned()),
                    is_done: false,
                    result: None,
                    error: None,
                };
            }
            self.manager.tick(None);
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// One materialized capability bound to a module.
#[derive(Clone)]
pub enum Capability {
    LogBasic(LogProxy),
    LogAdvanced(LogProxy),
    StorageRead(StorageReadProxy),
    StorageWrite(StorageWriteProxy),
    Network(NetworkProxy),
    Crypto(CryptoProxy),
    Time(TimeProxy),
    ModuleRun,
    EventPublish(EventPublishProxy),
    EventSubscribe(EventSubscribeProxy),
    TaskScheduleInterval(TaskScheduleIntervalProxy),
    TaskScheduleOneshot(TaskScheduleOneshotProxy),
    TaskScheduleEvent(TaskScheduleEventProxy),
    TaskCancel(TaskCancelProxy),
    AsyncSchedule(AsyncScheduleProxy),
    AsyncAwait(AsyncAwaitProxy),
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::LogBasic(_) => "log.basic",
            Capability::LogAdvanced(_) => "log.advanced",
            Capability::StorageRead(_) => "storage.read",
            Capability::StorageWrite(_) => "storage.write",
            Capability::Network(_) => "network",
            Capability::Crypto(_) => "crypto",
            Capability::Time(_) => "time",
            Capability::ModuleRun => "module.run",
            Capability::EventPublish(_) => "event.publish",
            Capability::EventSubscribe(_) => "event.subscribe",
            Capability::TaskScheduleInterval(_) => "task.schedule.interval",
            Capability::TaskScheduleOneshot(_) => "task.schedule.oneshot",
            Capability::TaskScheduleEvent(_) => "task.schedule.event",
            Capability::TaskCancel(_) => "task.cancel",
            Capability::AsyncSchedule(_) => "async.schedule",
            Capability::AsyncAwait(_) => "async.await",
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capability({})", self.name())
    }
}

/// The narrow capability surface handed to a module.
#[derive(Clone, Default, Debug)]
pub struct CapabilityMap {
    caps: BTreeMap<&'static str, Capability>,
}

impl CapabilityMap {
    fn insert(&mut self, cap: Capability) {
        self.caps.insert(cap.name(), cap);
    }

    pub fn has(&self, name: &str) -> bool {
        self.caps.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.caps.get(name)
    }

    /// Granted capability names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.caps.keys().map(|k| (*k).to_owned()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Whether the module may be executed at all.
    pub fn can_run(&self) -> bool {
        self.has("module.run")
    }

    pub fn log(&self) -> Option<&LogProxy> {
        match (self.caps.get("log.advanced"), self.caps.get("log.basic")) {
            (Some(Capability::LogAdvanced(p)), _) | (_, Some(Capability::LogBasic(p))) => Some(p),
            _ => None,
        }
    }

    pub fn storage_read(&self) -> Option<&StorageReadProxy> {
        match self.caps.get("storage.read") {
            Some(Capability::StorageRead(p)) => Some(p),
            _ => None,
        }
    }

    pub fn storage_write(&self) -> Option<&StorageWriteProxy> {
        match self.caps.get("storage.write") {
            Some(Capability::StorageWrite(p)) => Some(p),
            _ => None,
        }
    }

    pub fn network(&self) -> Option<&NetworkProxy> {
        match self.caps.get("network") {
            Some(Capability::Network(p)) => Some(p),
            _ => None,
        }
    }

    pub fn crypto(&self) -> Option<&CryptoProxy> {
        match self.caps.get("crypto") {
            Some(Capability::Crypto(p)) => Some(p),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<&TimeProxy> {
        match self.caps.get("time") {
            Some(Capability::Time(p)) => Some(p),
            _ => None,
        }
    }

    pub fn event_publish(&self) -> Option<&EventPublishProxy> {
        match self.caps.get("event.publish") {
            Some(Capability::EventPublish(p)) => Some(p),
            _ => None,
        }
    }

    pub fn event_subscribe(&self) -> Option<&EventSubscribeProxy> {
        match self.caps.get("event.subscribe") {
            Some(Capability::EventSubscribe(p)) => Some(p),
            _ => None,
        }
    }

    pub fn schedule_interval(&self) -> Option<&TaskScheduleIntervalProxy> {
        match self.caps.get("task.schedule.interval") {
            Some(Capability::TaskScheduleInterval(p)) => Some(p),
            _ => None,
        }
    }

    pub fn schedule_oneshot(&self) -> Option<&TaskScheduleOneshotProxy> {
        match self.caps.get("task.schedule.oneshot") {
            Some(Capability::TaskScheduleOneshot(p)) => Some(p),
            _ => None,
        }
    }

    pub fn schedule_event(&self) -> Option<&TaskScheduleEventProxy> {
        match self.caps.get("task.schedule.event") {
            Some(Capability::TaskScheduleEvent(p)) => Some(p),
            _ => None,
        }
    }

    pub fn task_cancel(&self) -> Option<&TaskCancelProxy> {
        match self.caps.get("task.cancel") {
            Some(Capability::TaskCancel(p)) => Some(p),
            _ => None,
        }
    }

    pub fn async_schedule(&self) -> Option<&AsyncScheduleProxy> {
        match self.caps.get("async.schedule") {
            Some(Capability::AsyncSchedule(p)) => Some(p),
            _ => None,
        }
    }

    pub fn async_await(&self) -> Option<&AsyncAwaitProxy> {
        match self.caps.get("async.await") {
            Some(Capability::AsyncAwait(p)) => Some(p),
            _ => None,
        }
    }
}

/// Binds requested capabilities into proxies for one module.
pub struct CapabilityManager {
    registry: CapabilityRegistry,
    bus: Option<Arc<EventBus>>,
    scheduler: Option<Arc<Scheduler>>,
    async_manager: Option<Arc<AsyncTaskManager>>,
    implicit_module_run: bool,
}

impl CapabilityManager {
    pub fn new(
        bus: Option<Arc<EventBus>>,
        scheduler: Option<Arc<Scheduler>>,
        async_manager: Option<Arc<AsyncTaskManager>>,
    ) -> Self {
        Self {
            registry: CapabilityRegistry::new(),
            bus,
            scheduler,
            async_manager,
            implicit_module_run: true,
        }
    }

    /// Disable the automatic `module.run` grant (test harness hook).
    #[must_use]
    pub fn with_implicit_module_run(mut self, enabled: bool) -> Self {
        self.implicit_module_run = enabled;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Validate the manifest's `requires` and `optional` sets against the
    /// registry.
    ///
    /// # Errors
    /// See [`CapabilityRegistry::validate_list`].
    pub fn validate_manifest(&self, manifest: &ModuleManifest) -> Result<(), CapabilityError> {
        self.registry.validate_list(&manifest.capabilities.requires)?;
        self.registry.validate_list(&manifest.capabilities.optional)?;
        Ok(())
    }

    /// Build the capability map for a module. Required capabilities that
    /// cannot be bound fail the load; optional ones are granted whenever
    /// they validate. `module.run` is always granted unless the implicit
    /// grant is disabled.
    ///
    /// # Errors
    /// `Unknown`/`Restricted` for bad names, `Unsatisfied` when the backing
    /// infrastructure is missing.
    pub fn build_map(
        &self,
        manifest: &ModuleManifest,
        module_name: &str,
        storage: &Arc<ModuleStorage>,
    ) -> Result<CapabilityMap, CapabilityError> {
        let mut map = CapabilityMap::default();

        for name in &manifest.capabilities.requires {
            map.insert(self.bind(name, module_name, storage)?);
        }
        for name in &manifest.capabilities.optional {
            if self.registry.has(name) {
                map.insert(self.bind(name, module_name, storage)?);
            }
        }

        if self.implicit_module_run && !map.can_run() {
            map.insert(Capability::ModuleRun);
        }

        Ok(map)
    }

    fn bind(
        &self,
        name: &str,
        module_name: &str,
        storage: &Arc<ModuleStorage>,
    ) -> Result<Capability, CapabilityError> {
        if self.registry.is_restricted(name) {
            return Err(CapabilityError::Restricted(name.to_owned()));
        }

        let bus = |missing: &'static str| {
            self.bus
                .clone()
                .ok_or(CapabilityError::Unsatisfied {
                    name: name.to_owned(),
                    missing,
                })
        };
        let scheduler = |missing: &'static str| {
            self.scheduler
                .clone()
                .ok_or(CapabilityError::Unsatisfied {
                    name: name.to_owned(),
                    missing,
                })
        };
        let async_manager = |missing: &'static str| {
            self.async_manager
                .clone()
                .ok_or(CapabilityError::Unsatisfied {
                    name: name.to_owned(),
                    missing,
                })
        };

        let cap = match name {
            "log.basic" => Capability::LogBasic(LogProxy::new(module_name, false)),
            "log.advanced" => Capability::LogAdvanced(LogProxy::new(module_name, true)),
            "storage.read" => Capability::StorageRead(StorageReadProxy {
                storage: storage.clone(),
            }),
            "storage.write" => Capability::StorageWrite(StorageWriteProxy {
                storage: storage.clone(),
            }),
            "network" => Capability::Network(NetworkProxy),
            "crypto" => Capability::Crypto(CryptoProxy),
            "time" => Capability::Time(TimeProxy),
            "module.run" => Capability::ModuleRun,
            "event.publish" => Capability::EventPublish(EventPublishProxy {
                bus: bus("event bus")?,
                module: Arc::from(module_name),
            }),
            "event.subscribe" => Capability::EventSubscribe(EventSubscribeProxy {
                bus: bus("event bus")?,
                module: Arc::from(module_name),
            }),
            "task.schedule.interval" => Capability::TaskScheduleInterval(TaskScheduleIntervalProxy {
                scheduler: scheduler("scheduler")?,
            }),
            "task.schedule.oneshot" => Capability::TaskScheduleOneshot(TaskScheduleOneshotProxy {
                scheduler: scheduler("scheduler")?,
            }),
            "task.schedule.event" => Capability::TaskScheduleEvent(TaskScheduleEventProxy {
                scheduler: scheduler("scheduler")?,
            }),
            "task.cancel" => Capability::TaskCancel(TaskCancelProxy {
                scheduler: scheduler("scheduler")?,
            }),
            "async.schedule" => Capability::AsyncSchedule(AsyncScheduleProxy {
                manager: async_manager("async manager")?,
            }),
            "async.await" => Capability::AsyncAwait(AsyncAwaitProxy {
                manager: async_manager("async manager")?,
            }),
            other => return Err(CapabilityError::Unknown(other.to_owned())),
        };
        Ok(cap)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::manifest::CapabilityRequest;
    use serde_json::json;

    fn manifest_with(requires: &[&str], optional: &[&str]) -> ModuleManifest {
        ModuleManifest {
            capabilities: CapabilityRequest {
                requires: requires.iter().map(|s| (*s).to_owned()).collect(),
                optional: optional.iter().map(|s| (*s).to_owned()).collect(),
            },
            ..ModuleManifest::minimal("demo", "1.0.0", 40, "DemoModule")
        }
    }

    fn storage() -> (tempfile::TempDir, Arc<ModuleStorage>) {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(ModuleStorage::new(root.path(), "demo").unwrap());
        (root, storage)
    }

    fn full_manager() -> (Arc<EventBus>, CapabilityManager) {
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(Scheduler::new(Arc::downgrade(&bus)));
        let manager = Arc::new(AsyncTaskManager::new(Arc::downgrade(&bus)));
        bus.attach_scheduler(scheduler.clone());
        bus.attach_async_manager(manager.clone());
        let caps = CapabilityManager::new(Some(bus.clone()), Some(scheduler), Some(manager));
        (bus, caps)
    }

    #[test]
    fn module_run_is_implicit() {
        let (_bus, manager) = full_manager();
        let (_root, storage) = storage();
        let map = manager
            .build_map(&manifest_with(&["log.basic"], &[]), "demo", &storage)
            .unwrap();
        assert!(map.can_run());
        assert_eq!(
            map.names(),
            vec!["log.basic".to_owned(), "module.run".to_owned()]
        );
    }

    #[test]
    fn implicit_grant_can_be_disabled() {
        let (_bus, manager) = full_manager();
        let manager = manager.with_implicit_module_run(false);
        let (_root, storage) = storage();
        let map = manager
            .build_map(&manifest_with(&["log.basic"], &[]), "demo", &storage)
            .unwrap();
        assert!(!map.can_run());
    }

    #[test]
    fn restricted_capability_is_refused() {
        let (_bus, manager) = full_manager();
        let err = manager
            .validate_manifest(&manifest_with(&["os.exec"], &[]))
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Restricted(_)));
    }

    #[test]
    fn unknown_optional_capability_is_skipped_in_binding() {
        let (_bus, manager) = full_manager();
        let (_root, storage) = storage();
        // Optional names are filtered through the registry when binding.
        let map = manager
            .build_map(&manifest_with(&[], &["telepathy"]), "demo", &storage)
            .unwrap();
        assert!(!map.has("telepathy"));
    }

    #[test]
    fn missing_infrastructure_is_a_binding_failure() {
        let manager = CapabilityManager::new(None, None, None);
        let (_root, storage) = storage();
        let err = manager
            .build_map(&manifest_with(&["event.publish"], &[]), "demo", &storage)
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Unsatisfied { .. }));
    }

    #[test]
    fn storage_proxies_share_the_sandbox() {
        let (_bus, manager) = full_manager();
        let (_root, storage) = storage();
        let map = manager
            .build_map(
                &manifest_with(&["storage.read", "storage.write"], &[]),
                "demo",
                &storage,
            )
            .unwrap();

        map.storage_write()
            .unwrap()
            .write_json("data.json", &json!({"k": 1}))
            .unwrap();
        let back = map.storage_read().unwrap().read_json("data.json").unwrap();
        assert_eq!(back, json!({"k": 1}));

        let err = map.storage_read().unwrap().read_text("../oops").unwrap_err();
        assert!(matches!(err, StorageError::PathNotPermitted { .. }));
    }

    #[test]
    fn crypto_digest_is_stable() {
        let crypto = CryptoProxy;
        assert_eq!(
            crypto.sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn event_publish_proxy_tags_the_source() {
        let (bus, manager) = full_manager();
        let (_root, storage) = storage();
        let map = manager
            .build_map(&manifest_with(&["event.publish"], &[]), "demo", &storage)
            .unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe_sync(
            "demo.ping",
            "collector",
            Arc::new(move |ctx| {
                seen2.lock().push(ctx.source.clone());
                Ok(Value::Null)
            }),
        );

        map.event_publish()
            .unwrap()
            .publish("demo.ping", Map::new());
        assert_eq!(seen.lock().as_slice(), ["demo".to_owned()]);
    }
}
