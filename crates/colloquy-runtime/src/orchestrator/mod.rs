//! The conversation orchestrator and its internals.

pub mod orchestrator;
pub mod query_wait;
pub mod subscriptions;
pub mod turn_registry;
