//! The async task manager: admission, cooperative stepping, archival.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::async_exec::task::{AsyncTask, AsyncTaskStatus, AsyncTaskView, TaskFuture};
use crate::clock;
use crate::events::{EventBus, EventContext};

/// Maximum concurrently running tasks.
pub const MAX_RUNNING: usize = 16;

/// Maximum queued (not yet admitted) tasks; `create_task` rejects beyond it.
pub const MAX_PENDING: usize = 128;

/// Running tasks stepped per tick.
pub const MAX_TASKS_PER_TICK: usize = 10;

/// Finished tasks retained for introspection; oldest evicted beyond this.
pub const ARCHIVE_CAP: usize = 100;

/// Manager counters reported through `query.status`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct AsyncStats {
    pub tick_count: u64,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

#[derive(Default)]
struct ManagerInner {
    tasks: HashMap<String, AsyncTask>,
    pending: VecDeque<String>,
    running: Vec<String>,
}

/// Local cooperative loop for suspendable tasks.
///
/// Public operations never panic; failures degrade to `None`/`false`/empty
/// and are surfaced through the task's `error` field or the
/// `system.async.done` event.
pub struct AsyncTaskManager {
    inner: Mutex<ManagerInner>,
    bus: Weak<EventBus>,
    tick_count: AtomicU64,
}

impl AsyncTaskManager {
    /// The bus reference is weak for the same reason as the scheduler's:
    /// the bus holds this manager strongly for async handler dispatch.
    pub fn new(bus: Weak<EventBus>) -> Self {
        Self {
            inner: Mutex::new(ManagerInner::default()),
            bus,
            tick_count: AtomicU64::new(0),
        }
    }

    /// Queue a suspendable task. Returns `None` when the pending queue is
    /// at [`MAX_PENDING`]; existing tasks are unaffected.
    pub fn create_task(&self, future: TaskFuture, metadata: Map<String, Value>) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.pending.len() >= MAX_PENDING {
            tracing::warn!("Async task rejected: pending queue full");
            return None;
        }

        let task = AsyncTask::new(future, metadata, clock::now());
        let id = task.id().to_owned();
        inner.pending.push_back(id.clone());
        inner.tasks.insert(id.clone(), task);
        Some(id)
    }

    /// Execute one cooperative tick at `now` (wall clock when `None`):
    /// admit pending tasks up to [`MAX_RUNNING`], step up to
    /// [`MAX_TASKS_PER_TICK`] running tasks once each, archive finished
    /// tasks, and emit `system.async.tick`.
    pub fn tick(&self, now: Option<f64>) {
        let now = now.unwrap_or_else(clock::now);
        let tick_count = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;

        let (done, pending_count, running_count) = {
            let mut inner = self.inner.lock();

            // 1) Admit.
            while inner.running.len() < MAX_RUNNING {
                let Some(id) = inner.pending.pop_front() else {
                    break;
                };
                if let Some(task) = inner.tasks.get_mut(&id) {
                    task.start(now);
                    inner.running.push(id);
                }
            }

            // 2) Advance. Step the front of the running list; finished
            //    tasks leave it so later entries get their turn next tick.
            let step_ids: Vec<String> =
                inner.running.iter().take(MAX_TASKS_PER_TICK).cloned().collect();
            let mut done = Vec::new();
            for id in step_ids {
                let still_running = inner
                    .tasks
                    .get_mut(&id)
                    .is_some_and(|task| task.step(now));
                if !still_running {
                    inner.running.retain(|r| r != &id);
                    if let Some(task) = inner.tasks.get(&id) {
                        done.push(task.view());
                    }
                }
            }

            // 3) Evict the oldest finished tasks beyond the archive cap.
            Self::prune_archive(&mut inner);

            (done, inner.pending.len(), inner.running.len())
        };

        // Publishing happens outside the lock: a `system.async.done` handler
        // may itself schedule new async work.
        for view in done {
            self.publish(
                "system.async.done",
                json!({
                    "task_id": view.id,
                    "status": view.status,
                    "result": view.result,
                    "error": view.error,
                    "metadata": view.metadata,
                }),
            );
        }

        self.publish(
            "system.async.tick",
            json!({
                "tick_count": tick_count,
                "timestamp": now,
                "pending": pending_count,
                "running": running_count,
            }),
        );
    }

    fn prune_archive(inner: &mut ManagerInner) {
        let finished = inner
            .tasks
            .values()
            .filter(|t| t.is_done())
            .count();
        if finished <= ARCHIVE_CAP {
            return;
        }

        let mut done: Vec<(String, f64)> = inner
            .tasks
            .values()
            .filter(|t| t.is_done())
            .map(|t| (t.id().to_owned(), t.completed_at().unwrap_or(0.0)))
            .collect();
        done.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let excess = finished - ARCHIVE_CAP;
        for (id, _) in done.into_iter().take(excess) {
            inner.tasks.remove(&id);
        }
    }

    /// Cancel a task: pending tasks leave the queue, running tasks drop
    /// their future. Reports `false` for unknown or finished tasks.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return false;
        };
        let cancelled = task.cancel(clock::now());
        if cancelled {
            inner.pending.retain(|id| id != task_id);
            inner.running.retain(|id| id != task_id);
        }
        cancelled
    }

    /// Serialized view of one task.
    pub fn get(&self, task_id: &str) -> Option<AsyncTaskView> {
        self.inner.lock().tasks.get(task_id).map(AsyncTask::view)
    }

    /// Serialized views, optionally filtered by status, ordered by creation
    /// time.
    pub fn list(&self, status: Option<AsyncTaskStatus>) -> Vec<AsyncTaskView> {
        let inner = self.inner.lock();
        let mut views: Vec<AsyncTaskView> = inner
            .tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status() == s))
            .map(AsyncTask::view)
            .collect();
        views.sort_by(|a, b| {
            a.created_at
                .partial_cmp(&b.created_at)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        views
    }

    pub fn stats(&self) -> AsyncStats {
        let inner = self.inner.lock();
        AsyncStats {
            tick_count: self.tick_count.load(Ordering::SeqCst),
            total_tasks: inner.tasks.len(),
            pending_tasks: inner.pending.len(),
            running_tasks: inner.running.len(),
            completed_tasks: inner
                .tasks
                .values()
                .filter(|t| t.status() == AsyncTaskStatus::Completed)
                .count(),
            failed_tasks: inner
                .tasks
                .values()
                .filter(|t| t.status() == AsyncTaskStatus::Failed)
                .count(),
        }
    }

    fn publish(&self, event_type: &str, payload: Value) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        let ctx = EventContext::new(event_type, "async_manager", payload).with_category("system");
        bus.publish(event_type, &ctx);
    }
}
