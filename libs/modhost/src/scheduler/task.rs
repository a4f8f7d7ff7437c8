//! Schedulable task model.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::events::EventContext;

/// Consecutive failures after which a task is disabled.
pub const MAX_TASK_FAILURES: u32 = 3;

/// Timed callable: interval, oneshot and system tasks.
pub type TimedTaskFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// Event callable: receives the triggering event's context.
pub type EventTaskFn = dyn Fn(&EventContext) -> anyhow::Result<()> + Send + Sync;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Interval,
    Oneshot,
    Event,
    System,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskKind::Interval => "interval",
            TaskKind::Oneshot => "oneshot",
            TaskKind::Event => "event",
            TaskKind::System => "system",
        };
        f.write_str(label)
    }
}

#[derive(Clone)]
pub(crate) enum TaskFn {
    Timed(Arc<TimedTaskFn>),
    Event(Arc<EventTaskFn>),
}

struct TaskState {
    next_run: f64,
    enabled: bool,
    failure_count: u32,
    last_error: Option<String>,
}

/// A registered unit of future work.
///
/// Identity and callable are immutable; scheduling bookkeeping lives behind
/// a short-lived lock so execution never holds it.
pub struct Task {
    id: String,
    kind: TaskKind,
    callable: TaskFn,
    interval: Option<f64>,
    event_type: Option<String>,
    metadata: Map<String, Value>,
    state: Mutex<TaskState>,
}

/// Serialized task view (no callable reference).
#[derive(Clone, Debug, Serialize)]
pub struct TaskView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub interval: Option<f64>,
    pub event_type: Option<String>,
    pub next_run: Option<f64>,
    pub enabled: bool,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub metadata: Map<String, Value>,
}

impl Task {
    pub(crate) fn interval(
        callable: Arc<TimedTaskFn>,
        interval: f64,
        next_run: f64,
        metadata: Map<String, Value>,
    ) -> Self {
        Self::new(
            TaskKind::Interval,
            TaskFn::Timed(callable),
            Some(interval),
            None,
            next_run,
            metadata,
        )
    }

    pub(crate) fn oneshot(
        callable: Arc<TimedTaskFn>,
        next_run: f64,
        metadata: Map<String, Value>,
    ) -> Self {
        Self::new(
            TaskKind::Oneshot,
            TaskFn::Timed(callable),
            None,
            None,
            next_run,
            metadata,
        )
    }

    pub(crate) fn event(
        event_type: &str,
        callable: Arc<EventTaskFn>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self::new(
            TaskKind::Event,
            TaskFn::Event(callable),
            None,
            Some(event_type.to_owned()),
            f64::INFINITY,
            metadata,
        )
    }

    pub(crate) fn system(
        callable: Arc<TimedTaskFn>,
        interval: f64,
        next_run: f64,
        metadata: Map<String, Value>,
    ) -> Self {
        Self::new(
            TaskKind::System,
            TaskFn::Timed(callable),
            Some(interval),
            None,
            next_run,
            metadata,
        )
    }

    fn new(
        kind: TaskKind,
        callable: TaskFn,
        interval: Option<f64>,
        event_type: Option<String>,
        next_run: f64,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            callable,
            interval,
            event_type,
            metadata,
            state: Mutex::new(TaskState {
                next_run,
                enabled: true,
                failure_count: 0,
                last_error: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub(crate) fn callable(&self) -> TaskFn {
        self.callable.clone()
    }

    /// Whether the task should run at `now`. Event tasks are never due on
    /// the clock.
    pub fn due(&self, now: f64) -> bool {
        if self.kind == TaskKind::Event {
            return false;
        }
        let state = self.state.lock();
        state.enabled && now >= state.next_run
    }

    /// Re-arm an interval/system task, or disable a oneshot after it fired.
    /// Returns the next run time for tasks that stay armed.
    pub(crate) fn reschedule(&self, now: f64) -> Option<f64> {
        let mut state = self.state.lock();
        match (self.kind, self.interval) {
            (TaskKind::Interval | TaskKind::System, Some(interval)) => {
                state.next_run = now + interval;
                Some(state.next_run)
            }
            (TaskKind::Oneshot, _) => {
                state.enabled = false;
                None
            }
            _ => None,
        }
    }

    pub(crate) fn mark_success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        state.last_error = None;
    }

    /// Record a failure; the task disables itself after
    /// [`MAX_TASK_FAILURES`] consecutive failures. Returns whether the task
    /// is now disabled.
    pub(crate) fn mark_failure(&self, error: &str) -> bool {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_error = Some(error.to_owned());
        if state.failure_count >= MAX_TASK_FAILURES {
            state.enabled = false;
        }
        !state.enabled
    }

    pub(crate) fn disable(&self) {
        self.state.lock().enabled = false;
    }

    pub fn view(&self) -> TaskView {
        let state = self.state.lock();
        TaskView {
            id: self.id.clone(),
            kind: self.kind,
            interval: self.interval,
            event_type: self.event_type.clone(),
            next_run: state.next_run.is_finite().then_some(state.next_run),
            enabled: state.enabled,
            failure_count: state.failure_count,
            last_error: state.last_error.clone(),
            metadata: self.metadata.clone(),
        }
    }
}
