//! Capability-based permissions.
//!
//! The registry is the catalogue of grantable capability kinds; the manager
//! turns a manifest's requested names into a per-module [`CapabilityMap`]
//! of proxy objects. A proxy holds only the infrastructure reference it
//! needs and exposes a narrow method surface, so modules never see the bus,
//! scheduler, or storage engine directly.

mod proxy;
mod registry;

pub use proxy::{
    AsyncAwaitProxy, AsyncScheduleProxy, AwaitReport, Capability, CapabilityManager,
    CapabilityMap, CryptoProxy, EventPublishProxy, EventSubscribeProxy, LogProxy, NetworkProxy,
    StorageReadProxy, StorageWriteProxy, TaskCancelProxy, TaskScheduleEventProxy,
    TaskScheduleIntervalProxy, TaskScheduleOneshotProxy, TimeProxy,
};
pub use registry::{CapabilityDef, CapabilityError, CapabilityRegistry, SafetyLevel};
