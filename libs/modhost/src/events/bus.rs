//! Central event dispatcher.
//!
//! Subscribers are kept per event type in subscription order. The lock
//! protecting the table is held only for structural mutation: `publish`
//! snapshots the handler list and dispatches with the lock released, so
//! handlers may freely subscribe, unsubscribe, or publish again.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use serde::ser::SerializeMap;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::async_exec::{AsyncTaskManager, TaskFuture};
use crate::events::EventContext;
use crate::scheduler::Scheduler;

/// Synchronous handler: runs in the publisher's thread.
pub type SyncHandlerFn = dyn Fn(&EventContext) -> anyhow::Result<Value> + Send + Sync;

/// Asynchronous handler: produces a suspendable future that is handed to
/// the async task manager.
pub type AsyncHandlerFn = dyn Fn(EventContext) -> TaskFuture + Send + Sync;

#[derive(Clone)]
enum HandlerKind {
    Sync(Arc<SyncHandlerFn>),
    Async(Arc<AsyncHandlerFn>),
}

#[derive(Clone)]
struct Handler {
    id: HandlerId,
    name: String,
    kind: HandlerKind,
}

/// Opaque subscription handle used for unsubscribing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HandlerId(Uuid);

/// One slot of a `publish` result list.
///
/// Consumers must be tagged-union-aware: a synchronous handler contributes
/// its return value, an asynchronous one contributes a task id, and a
/// failing one contributes its error message without stopping fan-out.
#[derive(Clone, Debug)]
pub enum PublishOutcome {
    Sync(Value),
    Async { task_id: String },
    Error(String),
}

impl PublishOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, PublishOutcome::Error(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PublishOutcome::Sync(v) => Some(v),
            _ => None,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            PublishOutcome::Async { task_id } => Some(task_id),
            _ => None,
        }
    }
}

impl Serialize for PublishOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PublishOutcome::Sync(v) => v.serialize(serializer),
            PublishOutcome::Async { task_id } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("async", &true)?;
                map.serialize_entry("task_id", task_id)?;
                map.end()
            }
            PublishOutcome::Error(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}

/// Topic-indexed publish/subscribe bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Handler>>>,
    scheduler: ArcSwapOption<Scheduler>,
    async_manager: ArcSwapOption<AsyncTaskManager>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            scheduler: ArcSwapOption::from(None),
            async_manager: ArcSwapOption::from(None),
        }
    }

    /// Attach the scheduler consulted for event-triggered tasks after
    /// handler fan-out.
    pub fn attach_scheduler(&self, scheduler: Arc<Scheduler>) {
        self.scheduler.store(Some(scheduler));
    }

    /// Attach the async manager used to run asynchronous handlers.
    pub fn attach_async_manager(&self, manager: Arc<AsyncTaskManager>) {
        self.async_manager.store(Some(manager));
    }

    fn subscribe_inner(&self, event_type: &str, handler: Handler) -> HandlerId {
        let id = handler.id;
        let mut table = self.subscribers.write();
        table.entry(event_type.to_owned()).or_default().push(handler);
        id
    }

    /// Subscribe a synchronous handler; returns the handle for later
    /// unsubscription.
    pub fn subscribe_sync(
        &self,
        event_type: &str,
        name: &str,
        handler: Arc<SyncHandlerFn>,
    ) -> HandlerId {
        self.subscribe_inner(
            event_type,
            Handler {
                id: HandlerId(Uuid::new_v4()),
                name: name.to_owned(),
                kind: HandlerKind::Sync(handler),
            },
        )
    }

    /// Subscribe an asynchronous handler.
    pub fn subscribe_async(
        &self,
        event_type: &str,
        name: &str,
        handler: Arc<AsyncHandlerFn>,
    ) -> HandlerId {
        self.subscribe_inner(
            event_type,
            Handler {
                id: HandlerId(Uuid::new_v4()),
                name: name.to_owned(),
                kind: HandlerKind::Async(handler),
            },
        )
    }

    /// Remove a handler. Unsubscribing an unknown handler is a no-op and
    /// reports `false`.
    pub fn unsubscribe(&self, event_type: &str, id: HandlerId) -> bool {
        let mut table = self.subscribers.write();
        let Some(handlers) = table.get_mut(event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        handlers.len() != before
    }

    /// Publish an event to all handlers of its type, in subscription order.
    ///
    /// Handler failures are captured in the result list and never stop
    /// dispatch to the remaining handlers. After fan-out the scheduler's
    /// event-triggered tasks fire; scheduler problems are contained so
    /// publication itself cannot fail.
    pub fn publish(&self, event_type: &str, ctx: &EventContext) -> Vec<PublishOutcome> {
        let handlers: Vec<Handler> = {
            let table = self.subscribers.read();
            table.get(event_type).cloned().unwrap_or_default()
        };

        let mut results = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            let outcome = match &handler.kind {
                HandlerKind::Sync(f) => match f(ctx) {
                    Ok(value) => PublishOutcome::Sync(value),
                    Err(e) => {
                        tracing::warn!(
                            event_type,
                            handler = %handler.name,
                            error = %e,
                            "Event handler failed"
                        );
                        PublishOutcome::Error(e.to_string())
                    }
                },
                HandlerKind::Async(f) => self.spawn_async_handler(event_type, handler, f, ctx),
            };
            results.push(outcome);
        }

        if let Some(scheduler) = self.scheduler.load_full() {
            scheduler.trigger_event(event_type, ctx);
        }

        results
    }

    fn spawn_async_handler(
        &self,
        event_type: &str,
        handler: &Handler,
        f: &Arc<AsyncHandlerFn>,
        ctx: &EventContext,
    ) -> PublishOutcome {
        let Some(manager) = self.async_manager.load_full() else {
            return PublishOutcome::Error("async handler but no async_manager".to_owned());
        };

        let mut metadata = serde_json::Map::new();
        metadata.insert("type".to_owned(), Value::from("event_handler"));
        metadata.insert("event_type".to_owned(), Value::from(event_type));
        metadata.insert("handler".to_owned(), Value::from(handler.name.clone()));

        match manager.create_task(f(ctx.clone()), metadata) {
            Some(task_id) => PublishOutcome::Async { task_id },
            None => PublishOutcome::Error("async task queue full".to_owned()),
        }
    }

    /// All event types with at least one subscription, sorted.
    pub fn event_types(&self) -> Vec<String> {
        let table = self.subscribers.read();
        let mut types: Vec<String> = table
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        types.sort();
        types
    }

    /// Handler names for one event type, in subscription order.
    pub fn handler_names(&self, event_type: &str) -> Vec<String> {
        let table = self.subscribers.read();
        table
            .get(event_type)
            .map(|handlers| handlers.iter().map(|h| h.name.clone()).collect())
            .unwrap_or_default()
    }
}
