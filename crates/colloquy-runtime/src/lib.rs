//! # colloquy-runtime
//!
//! The Colloquy conversation orchestrator.
//!
//! - **Orchestrator**: conversation/turn lifecycle state machine, token
//!   minting and validation, user-query protocol
//! - **Turn registry**: in-process authoritative map of open turns
//! - **Subscriptions**: filtered, synchronous in-process event delivery
//! - **Agent traits**: the provisioning capability set consumed from an
//!   external [`agent::AgentFactory`]
//! - **Tool synthesis**: [`synthesis::ToolSynthesis`], always run on its
//!   own task, never through the orchestrator's event path
//! - **Query wait**: caller-owned bounded wait for a query answer
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: colloquy-core, colloquy-store.

#![deny(unsafe_code)]

pub mod agent;
pub mod errors;
pub mod orchestrator;
pub mod synthesis;

pub use agent::{AgentDeps, AgentFactory, AgentInstance, OrchestratorHandle};
pub use errors::RuntimeError;
pub use orchestrator::orchestrator::{
    AddTraceEntryRequest, CompleteTurnRequest, ConversationOrchestrator, ConversationView,
    StartTurnRequest,
};
pub use orchestrator::query_wait::{DEFAULT_QUERY_TIMEOUT, QueryWaitError, QueryWaiter};
pub use orchestrator::subscriptions::{EventCallback, EventFilter, Scope, SubscriptionHandle};
pub use synthesis::{NoopSynthesis, ToolSynthesis, ToolSynthesisInput, ToolSynthesisOutput};
