//! High-level store facade.

pub mod conversation_store;
