//! Orchestrator error taxonomy.

use colloquy_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the orchestrator and its collaborators.
///
/// NotFound and IllegalState are the caller-visible contract: unknown IDs
/// map to the former, calls arriving in the wrong lifecycle state to the
/// latter. Store failures pass through unchanged.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Unknown conversation ID.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// Unknown turn ID, or the turn is no longer in progress.
    #[error("turn not found: {0}")]
    TurnNotFound(String),

    /// Unknown user-query ID.
    #[error("user query not found: {0}")]
    QueryNotFound(String),

    /// The operation is not legal in the entity's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// An agent could not be provisioned.
    #[error("failed to provision agent {agent_id}: {reason}")]
    Provisioning {
        /// Agent that failed to come up.
        agent_id: String,
        /// Collaborator-reported reason.
        reason: String,
    },

    /// Tool synthesis failed.
    #[error("tool synthesis failed: {0}")]
    Synthesis(String),

    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
