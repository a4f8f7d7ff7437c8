//! Cooperative execution of suspendable tasks.
//!
//! An async task wraps a boxed future producing a JSON value. The manager
//! holds a local cooperative loop: each `tick` admits pending tasks up to
//! the running limit and polls a bounded number of running futures exactly
//! once. Work therefore progresses only when the owning manager ticks,
//! which the orchestrator does on every external action.

mod manager;
mod task;

pub use manager::{
    AsyncStats, AsyncTaskManager, ARCHIVE_CAP, MAX_PENDING, MAX_RUNNING, MAX_TASKS_PER_TICK,
};
pub use task::{yield_now, AsyncTaskStatus, AsyncTaskView, TaskFuture, YieldNow};
