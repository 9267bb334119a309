//! The agent capability set.
//!
//! For internally managed conversations the orchestrator provisions one
//! [`AgentInstance`] per declared agent through an [`AgentFactory`]
//! supplied at construction. The orchestrator only ever drives the
//! lifecycle edges of this trait; how an agent decides to take its turns
//! is entirely its own business, expressed through the orchestrator
//! handle it was given.

use std::sync::Arc;

use async_trait::async_trait;

use colloquy_core::conversation::{AgentConfig, AgentId, ScenarioConfiguration};
use colloquy_store::ConversationStore;

use crate::errors::RuntimeError;
use crate::orchestrator::orchestrator::ConversationOrchestrator;
use crate::synthesis::ToolSynthesis;

/// Shared handle agents use to call back into the orchestrator.
pub type OrchestratorHandle = Arc<ConversationOrchestrator>;

/// Collaborators handed to each agent at provisioning time.
#[derive(Clone)]
pub struct AgentDeps {
    /// Durable store (read access for agents).
    pub store: Arc<ConversationStore>,
    /// Tool execution service.
    pub synthesis: Arc<dyn ToolSynthesis>,
    /// Resolved scenario for scenario-driven agents, `None` otherwise.
    pub scenario: Option<ScenarioConfiguration>,
}

/// A live agent participating in one conversation.
#[async_trait]
pub trait AgentInstance: Send + Sync {
    /// The agent's identity.
    fn identity(&self) -> &AgentId;

    /// Bind the agent to its conversation with its auth token. Called
    /// once, before the agent receives any events.
    async fn initialize(&self, conversation_id: &str, auth_token: &str)
    -> Result<(), RuntimeError>;

    /// Observe a conversation event. Events arrive in emission order,
    /// one at a time per agent.
    async fn on_conversation_event(&self, event: &colloquy_core::events::ConversationEvent);

    /// Open the conversation. Called on the initiating agent only, after
    /// every agent has been attempted for provisioning.
    async fn initialize_conversation(&self) -> Result<(), RuntimeError>;
}

/// Constructs agent instances for internally managed conversations.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    /// Build one agent from its configuration.
    async fn create(
        &self,
        config: &AgentConfig,
        client: OrchestratorHandle,
        deps: AgentDeps,
    ) -> Result<Arc<dyn AgentInstance>, RuntimeError>;
}
