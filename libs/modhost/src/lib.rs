//! Modhost - an in-process module runtime.
//!
//! The kernel loads self-describing modules, binds capability proxies to
//! them, routes events among them, persists their JSON state, and drives
//! their scheduled and suspendable work cooperatively. Everything is
//! single-threaded-cooperative at its core: external actions are serial and
//! the scheduler/async-manager make progress by piggy-backing a `tick` on
//! every action the orchestrator executes.
//!
//! Subsystems:
//! - [`storage`] - sandboxed per-module file area
//! - [`state`] - atomic JSON state container with defaults and rollback
//! - [`capability`] - capability registry and per-module proxy binding
//! - [`events`] - publish/subscribe bus with sync and async handlers
//! - [`scheduler`] - cooperative interval/oneshot/event task scheduling
//! - [`async_exec`] - suspendable tasks stepped by a local cooperative loop
//! - [`manifest`] / [`validation`] - module self-description and its checks
//! - [`loader`] - descriptor resolution, binding, lifecycle, registration
//! - [`orchestrator`] - the single entrypoint dispatching external actions

pub mod action;
pub mod async_exec;
pub mod capability;
pub mod contracts;
pub mod events;
pub mod integrity;
pub mod loader;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod validation;

mod clock;

pub use action::{Action, ResultEnvelope};
pub use contracts::{
    LifecycleStage, ModuleCatalog, ModuleCtx, ModuleDescriptor, ModuleEntrypoint, RunOutcome,
};
pub use events::{EventBus, EventContext, PublishOutcome};
pub use loader::{IntegrityMode, LoadReport, ModuleLoader, RuntimeConfig};
pub use manifest::{CapabilityRequest, HookFlags, ModuleManifest, ReactiveSpec, MIN_PHASE};
pub use orchestrator::ExecutionOrchestrator;
pub use registry::{ModuleEntry, ModuleRegistry, ModuleStatus};
pub use state::ModuleState;
pub use storage::ModuleStorage;
