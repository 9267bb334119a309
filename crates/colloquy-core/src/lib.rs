//! # colloquy-core
//!
//! Foundation types for the Colloquy conversation orchestrator.
//!
//! This crate provides the shared vocabulary the other Colloquy crates
//! depend on:
//!
//! - **IDs**: prefixed UUIDv7 identifiers in [`ids`] (`conv_…`, `turn_…`)
//! - **Conversations**: [`conversation::Conversation`], agent identity and
//!   per-agent configuration, management mode
//! - **Turns**: [`turn::Turn`], [`turn::TurnShell`], and the tagged
//!   [`turn::TracePayload`] audit-trace variants
//! - **User queries**: [`query::UserQuery`] and its status lifecycle
//! - **Events**: [`events::ConversationEvent`], the exhaustive live-event
//!   taxonomy broadcast by the orchestrator
//! - **Logging**: `EnvFilter`-based tracing bootstrap in [`logging`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `colloquy-store` and
//! `colloquy-runtime`.

#![deny(unsafe_code)]

pub mod conversation;
pub mod events;
pub mod ids;
pub mod logging;
pub mod query;
pub mod turn;
