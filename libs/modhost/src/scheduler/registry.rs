//! Task registry: id lookup plus stable registration order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::scheduler::task::{Task, TaskKind, TaskView};

#[derive(Default)]
struct RegistryInner {
    // Registration order drives due-task selection; the map serves lookups.
    order: Vec<Arc<Task>>,
    by_id: HashMap<String, Arc<Task>>,
}

/// Registry of scheduled tasks, indexed by id and by event type.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

/// Registry counters reported through `query.status`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RegistryStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub disabled_tasks: usize,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: Task) -> Arc<Task> {
        let task = Arc::new(task);
        let mut inner = self.inner.lock();
        inner.by_id.insert(task.id().to_owned(), task.clone());
        inner.order.push(task.clone());
        task
    }

    pub fn unregister(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.by_id.remove(task_id).is_none() {
            return false;
        }
        inner.order.retain(|t| t.id() != task_id);
        true
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<Task>> {
        self.inner.lock().by_id.get(task_id).cloned()
    }

    /// Enabled non-event tasks due at `now`, in registration order.
    pub fn due_tasks(&self, now: f64) -> Vec<Arc<Task>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter(|t| t.due(now))
            .cloned()
            .collect()
    }

    /// Enabled event tasks listening on `event_type`, in registration order.
    pub fn event_handlers(&self, event_type: &str) -> Vec<Arc<Task>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter(|t| {
                t.kind() == TaskKind::Event && t.enabled() && t.event_type() == Some(event_type)
            })
            .cloned()
            .collect()
    }

    pub fn views(&self) -> Vec<TaskView> {
        let inner = self.inner.lock();
        inner.order.iter().map(|t| t.view()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        let total = inner.order.len();
        let enabled = inner.order.iter().filter(|t| t.enabled()).count();
        RegistryStats {
            total_tasks: total,
            enabled_tasks: enabled,
            disabled_tasks: total - enabled,
        }
    }
}
