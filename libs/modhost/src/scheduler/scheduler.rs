//! The cooperative scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::clock;
use crate::events::{EventBus, EventContext};
use crate::scheduler::registry::TaskRegistry;
use crate::scheduler::task::{EventTaskFn, Task, TaskFn, TimedTaskFn};

/// Upper bound of timed tasks executed per tick.
pub const MAX_TASKS_PER_TICK: usize = 10;

/// Scheduler counters reported through `query.status`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SchedulerStats {
    pub tick_count: u64,
    pub last_tick: f64,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub disabled_tasks: usize,
}

/// Cooperative clock + event hooks.
///
/// `tick` is caller-driven; the orchestrator invokes it on every external
/// action. Nothing here ever panics out of `tick` or `trigger_event`: task
/// failures are recorded on the task and surfaced as
/// `system.scheduler.executed` events.
pub struct Scheduler {
    registry: TaskRegistry,
    bus: Weak<EventBus>,
    tick_count: AtomicU64,
    last_tick: Mutex<f64>,
}

impl Scheduler {
    /// The bus reference is weak: the bus holds the scheduler strongly (for
    /// `trigger_event` after fan-out), so this direction must not create a
    /// reference cycle.
    pub fn new(bus: Weak<EventBus>) -> Self {
        Self {
            registry: TaskRegistry::new(),
            bus,
            tick_count: AtomicU64::new(0),
            last_tick: Mutex::new(0.0),
        }
    }

    /// Schedule a repeating task; first run after one full interval.
    pub fn schedule_interval(
        &self,
        callable: Arc<TimedTaskFn>,
        interval: f64,
        metadata: Map<String, Value>,
    ) -> String {
        let now = clock::now();
        let task = self
            .registry
            .register(Task::interval(callable, interval, now + interval, metadata));
        tracing::debug!(task_id = task.id(), interval, "Scheduled interval task");
        task.id().to_owned()
    }

    /// Schedule a single execution after `delay` seconds.
    pub fn schedule_oneshot(
        &self,
        callable: Arc<TimedTaskFn>,
        delay: f64,
        metadata: Map<String, Value>,
    ) -> String {
        let now = clock::now();
        let task = self
            .registry
            .register(Task::oneshot(callable, now + delay, metadata));
        tracing::debug!(task_id = task.id(), delay, "Scheduled oneshot task");
        task.id().to_owned()
    }

    /// Schedule a task fired through [`Scheduler::trigger_event`]; it is
    /// never due on the clock.
    pub fn schedule_event(
        &self,
        event_type: &str,
        callable: Arc<EventTaskFn>,
        metadata: Map<String, Value>,
    ) -> String {
        let task = self
            .registry
            .register(Task::event(event_type, callable, metadata));
        tracing::debug!(task_id = task.id(), event_type, "Scheduled event task");
        task.id().to_owned()
    }

    /// Cancel a task. Reports whether it was registered.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.registry.unregister(task_id)
    }

    /// Execute one cooperative tick at `now` (wall clock when `None`).
    ///
    /// Due tasks are selected in registration order and truncated to
    /// [`MAX_TASKS_PER_TICK`]; tasks scheduled during this tick only become
    /// eligible on a later tick.
    pub fn tick(&self, now: Option<f64>) {
        let now = now.unwrap_or_else(clock::now);
        let tick_count = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_tick.lock() = now;

        self.publish(
            "system.scheduler.tick",
            json!({ "tick_count": tick_count, "timestamp": now }),
        );

        let mut due = self.registry.due_tasks(now);
        if due.len() > MAX_TASKS_PER_TICK {
            due.truncate(MAX_TASKS_PER_TICK);
        }

        for task in due {
            self.execute_timed(&task, now);
        }
    }

    /// Fire all enabled event tasks registered for `event_type`.
    pub fn trigger_event(&self, event_type: &str, ctx: &EventContext) {
        for task in self.registry.event_handlers(event_type) {
            let outcome = match task.callable() {
                TaskFn::Event(f) => f(ctx),
                // Registration makes this unreachable; treat it as a failure
                // rather than panicking out of dispatch.
                TaskFn::Timed(_) => Err(anyhow::anyhow!("event task without event callable")),
            };

            match outcome {
                Ok(()) => {
                    task.mark_success();
                    self.publish(
                        "system.scheduler.executed",
                        json!({
                            "task_id": task.id(),
                            "task_type": "event",
                            "event_type": event_type,
                            "success": true,
                        }),
                    );
                }
                Err(e) => {
                    let disabled = task.mark_failure(&e.to_string());
                    tracing::warn!(
                        task_id = task.id(),
                        event_type,
                        error = %e,
                        disabled,
                        "Event task failed"
                    );
                    self.publish(
                        "system.scheduler.executed",
                        json!({
                            "task_id": task.id(),
                            "task_type": "event",
                            "event_type": event_type,
                            "success": false,
                            "error": e.to_string(),
                            "failure_count": task.failure_count(),
                            "disabled": disabled,
                        }),
                    );
                }
            }
        }
    }

    fn execute_timed(&self, task: &Task, now: f64) {
        let outcome = match task.callable() {
            TaskFn::Timed(f) => f(),
            TaskFn::Event(_) => Err(anyhow::anyhow!("timed task without timed callable")),
        };

        match outcome {
            Ok(()) => {
                task.mark_success();
                let next_run = task.reschedule(now);
                self.publish(
                    "system.scheduler.executed",
                    json!({
                        "task_id": task.id(),
                        "task_type": task.kind().to_string(),
                        "success": true,
                        "next_run": next_run,
                    }),
                );
            }
            Err(e) => {
                let disabled = task.mark_failure(&e.to_string());
                tracing::warn!(
                    task_id = task.id(),
                    task_type = %task.kind(),
                    error = %e,
                    disabled,
                    "Scheduled task failed"
                );
                self.publish(
                    "system.scheduler.executed",
                    json!({
                        "task_id": task.id(),
                        "task_type": task.kind().to_string(),
                        "success": false,
                        "error": e.to_string(),
                        "failure_count": task.failure_count(),
                        "disabled": disabled,
                    }),
                );
            }
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
        let ctx = EventContext::new(event_type, "scheduler", payload).with_category("system");
        bus.publish(event_type, &ctx);
    }

    pub fn stats(&self) -> SchedulerStats {
        let registry = self.registry.stats();
        SchedulerStats {
            tick_count: self.tick_count.load(Ordering::SeqCst),
            last_tick: *self.last_tick.lock(),
            total_tasks: registry.total_tasks,
            enabled_tasks: registry.enabled_tasks,
            disabled_tasks: registry.disabled_tasks,
        }
    }

    /// Serialized views of every registered task.
    pub fn tasks(&self) -> Vec<crate::scheduler::TaskView> {
        self.registry.views()
    }

    pub fn get_task(&self, task_id: &str) -> Option<crate::scheduler::TaskView> {
        self.registry.get(task_id).map(|t| t.view())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;

    fn detached_scheduler() -> Scheduler {
        Scheduler::new(Weak::new())
    }

    #[test]
    fn interval_task_fires_once_per_interval() {
        let scheduler = detached_scheduler();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        let id = scheduler.schedule_interval(
            Arc::new(move || {
                fired2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            10.0,
            Map::new(),
        );

        let start = clock::now();
        scheduler.tick(Some(start));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        scheduler.tick(Some(start + 10.0));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Same instant again: already rescheduled, nothing due.
        scheduler.tick(Some(start + 10.0));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        scheduler.tick(Some(start + 20.0));
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        assert!(scheduler.cancel(&id));
        scheduler.tick(Some(start + 30.0));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn oneshot_fires_exactly_once() {
        let scheduler = detached_scheduler();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        let id = scheduler.schedule_oneshot(
            Arc::new(move || {
                fired2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            1.0,
            Map::new(),
        );

        let start = clock::now();
        scheduler.tick(Some(start + 2.0));
        scheduler.tick(Some(start + 100.0));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.get_task(&id).unwrap().enabled);
    }

    #[test]
    fn failing_task_auto_disables_after_three_failures() {
        let scheduler = detached_scheduler();
        let id = scheduler.schedule_interval(
            Arc::new(|| anyhow::bail!("always broken")),
            1.0,
            Map::new(),
        );

        let start = clock::now();
        for step in 1..=5 {
            #[allow(clippy::cast_precision_loss)]
            scheduler.tick(Some(start + (step as f64) * 2.0));
        }

        let view = scheduler.get_task(&id).unwrap();
        assert!(!view.enabled);
        assert_eq!(view.failure_count, 3);
        assert_eq!(view.last_error.as_deref(), Some("always broken"));
    }

    #[test]
    fn at_most_ten_tasks_run_per_tick() {
        let scheduler = detached_scheduler();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..15 {
            let fired2 = fired.clone();
            scheduler.schedule_oneshot(
                Arc::new(move || {
                    fired2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                0.0,
                Map::new(),
            );
        }

        let start = clock::now();
        scheduler.tick(Some(start + 1.0));
        assert_eq!(fired.load(Ordering::SeqCst), MAX_TASKS_PER_TICK);

        scheduler.tick(Some(start + 2.0));
        assert_eq!(fired.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn event_tasks_fire_only_via_trigger() {
        let scheduler = detached_scheduler();
        let seen = Arc::new(PlMutex::new(Vec::new()));

        let seen2 = seen.clone();
        scheduler.schedule_event(
            "demo.event",
            Arc::new(move |ctx| {
                seen2.lock().push(ctx.event_type.clone());
                Ok(())
            }),
            Map::new(),
        );

        scheduler.tick(Some(clock::now() + 1000.0));
        assert!(seen.lock().is_empty());

        let ctx = EventContext::new("demo.event", "tests", Map::new());
        scheduler.trigger_event("demo.event", &ctx);
        assert_eq!(seen.lock().as_slice(), ["demo.event".to_owned()]);
    }

    #[test]
    fn executed_events_reach_the_bus() {
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(Scheduler::new(Arc::downgrade(&bus)));
        bus.attach_scheduler(scheduler.clone());

        let executed = Arc::new(PlMutex::new(Vec::new()));
        let executed2 = executed.clone();
        bus.subscribe_sync(
            "system.scheduler.executed",
            "collector",
            Arc::new(move |ctx| {
                executed2.lock().push(ctx.payload.clone());
                Ok(Value::Null)
            }),
        );

        scheduler.schedule_oneshot(Arc::new(|| Ok(())), 0.0, Map::new());
        scheduler.tick(Some(clock::now() + 1.0));

        let seen = executed.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("success"), Some(&json!(true)));
        assert_eq!(seen[0].get("task_type"), Some(&json!("oneshot")));
    }
}
