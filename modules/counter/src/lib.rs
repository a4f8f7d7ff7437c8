//! Demo module: a persistent counter exercising every lifecycle hook and
//! the state engine.

mod module;

pub use module::CounterModule;
