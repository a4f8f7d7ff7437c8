//! Demo module: reactive handlers chaining events with a bounded depth,
//! plus a suspendable `run` that completes through the async manager.

mod module;

pub use module::RelayModule;
