//! Suspendable task model.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// The suspendable unit of work: progresses a bit on every poll and
/// eventually resolves to a JSON result or an error message.
pub type TaskFuture = BoxFuture<'static, Result<Value, String>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for AsyncTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AsyncTaskStatus::Pending => "pending",
            AsyncTaskStatus::Running => "running",
            AsyncTaskStatus::Completed => "completed",
            AsyncTaskStatus::Failed => "failed",
            AsyncTaskStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Serialized task view (no future reference).
#[derive(Clone, Debug, Serialize)]
pub struct AsyncTaskView {
    pub id: String,
    pub status: AsyncTaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: f64,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub is_done: bool,
}

pub(crate) struct AsyncTask {
    id: String,
    status: AsyncTaskStatus,
    future: Option<TaskFuture>,
    result: Option<Value>,
    error: Option<String>,
    metadata: Map<String, Value>,
    created_at: f64,
    started_at: Option<f64>,
    completed_at: Option<f64>,
}

impl AsyncTask {
    pub(crate) fn new(future: TaskFuture, metadata: Map<String, Value>, now: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: AsyncTaskStatus::Pending,
            future: Some(future),
            result: None,
            error: None,
            metadata,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn status(&self) -> AsyncTaskStatus {
        self.status
    }

    pub(crate) fn start(&mut self, now: f64) {
        if self.status == AsyncTaskStatus::Pending {
            self.status = AsyncTaskStatus::Running;
            self.started_at = Some(now);
        }
    }

    /// Poll the wrapped future exactly once. Returns `true` while the task
    /// is still running. The waker is a no-op: the manager re-polls on every
    /// tick, so nothing needs waking.
    pub(crate) fn step(&mut self, now: f64) -> bool {
        if self.status != AsyncTaskStatus::Running {
            return false;
        }
        let Some(future) = self.future.as_mut() else {
            self.fail("task future missing", now);
            return false;
        };

        let mut cx = Context::from_waker(noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => true,
            Poll::Ready(Ok(value)) => {
                self.status = AsyncTaskStatus::Completed;
                self.result = Some(value);
                self.completed_at = Some(now);
                self.future = None;
                false
            }
            Poll::Ready(Err(message)) => {
                self.fail(&message, now);
                false
            }
        }
    }

    fn fail(&mut self, message: &str, now: f64) {
        self.status = AsyncTaskStatus::Failed;
        self.error = Some(message.to_owned());
        self.completed_at = Some(now);
        self.future = None;
    }

    /// Drop the future and mark the task cancelled. Finished tasks cannot
    /// be cancelled.
    pub(crate) fn cancel(&mut self, now: f64) -> bool {
        if self.is_done() {
            return false;
        }
        self.status = AsyncTaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.future = None;
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(
            self.status,
            AsyncTaskStatus::Completed | AsyncTaskStatus::Failed | AsyncTaskStatus::Cancelled
        )
    }

    pub(crate) fn completed_at(&self) -> Option<f64> {
        self.completed_at
    }

    pub(crate) fn view(&self) -> AsyncTaskView {
        AsyncTaskView {
            id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            is_done: self.is_done(),
        }
    }
}

/// Future that reports `Pending` on its first poll and `Ready` afterwards.
///
/// The canonical suspension point for cooperative tasks: awaiting it yields
/// control back to the manager for one tick.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspend the current task for one cooperative tick.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completes_after_one_suspension() {
        let future: TaskFuture = Box::pin(async {
            yield_now().await;
            Ok(json!(42))
        });
        let mut task = AsyncTask::new(future, Map::new(), 1.0);

        assert_eq!(task.status(), AsyncTaskStatus::Pending);
        task.start(2.0);
        assert_eq!(task.status(), AsyncTaskStatus::Running);

        assert!(task.step(3.0));
        assert!(!task.step(4.0));
        assert_eq!(task.status(), AsyncTaskStatus::Completed);

        let view = task.view();
        assert_eq!(view.result, Some(json!(42)));
        assert_eq!(view.completed_at, Some(4.0));
        assert!(view.is_done);
    }

    #[test]
    fn failure_captures_the_error() {
        let future: TaskFuture = Box::pin(async { Err("exploded".to_owned()) });
        let mut task = AsyncTask::new(future, Map::new(), 0.0);
        task.start(0.0);
        assert!(!task.step(1.0));
        assert_eq!(task.status(), AsyncTaskStatus::Failed);
        assert_eq!(task.view().error.as_deref(), Some("exploded"));
    }

    #[test]
    fn cancel_drops_the_future() {
        let future: TaskFuture = Box::pin(async { Ok(Value::Null) });
        let mut task = AsyncTask::new(future, Map::new(), 0.0);
        assert!(task.cancel(1.0));
        assert_eq!(task.status(), AsyncTaskStatus::Cancelled);
        assert!(!task.cancel(2.0));
        assert!(!task.step(3.0));
    }
}
