//! Event routing: the context every handler receives and the bus that
//! fans events out to subscribers.

mod bus;
mod context;

pub use bus::{AsyncHandlerFn, EventBus, HandlerId, PublishOutcome, SyncHandlerFn};
pub use context::EventContext;
