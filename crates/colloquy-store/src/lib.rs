//! # colloquy-store
//!
//! Durable SQLite store for the Colloquy orchestrator.
//!
//! - **Connection**: r2d2 pool over rusqlite, WAL + foreign keys,
//!   shared-cache in-memory databases for tests
//! - **Repositories**: stateless per-table CRUD, every method takes
//!   `&Connection`
//! - **[`ConversationStore`]**: transactional facade with
//!   per-conversation write locks and `SQLITE_BUSY` retry
//!
//! The store is the single source of truth. The orchestrator's in-memory
//! caches are derived from it and rebuilt from it after a restart.
//!
//! ## Crate Position
//!
//! Depends on: colloquy-core. Depended on by: colloquy-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use sqlite::connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, new_in_memory, open,
};
pub use sqlite::migrations::run_migrations;
pub use store::conversation_store::{
    AgentTokenSpec, ConversationPage, ConversationStore, ListConversationsOptions, TokenIdentity,
};
