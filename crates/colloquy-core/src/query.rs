//! User-query types.
//!
//! Agents may ask a human a question mid-turn. The orchestrator persists
//! the pending query and broadcasts it; it never times a query out: the
//! bounded wait belongs to the asking agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User-query lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserQueryStatus {
    /// Awaiting a response.
    Pending,
    /// Response recorded.
    Answered,
    /// Marked expired by an external actor. No orchestrator path sets
    /// this; the asking agent abandons locally instead.
    Expired,
}

impl UserQueryStatus {
    /// Stable string form (stored as TEXT).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Expired => "expired",
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "answered" => Some(Self::Answered),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// A question an agent has posed to a human.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    /// Query ID (`query_…`).
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Asking agent.
    pub agent_id: String,
    /// Question text.
    pub question: String,
    /// Context the asker wants echoed back with the answer.
    pub context: Value,
    /// Lifecycle status.
    pub status: UserQueryStatus,
    /// Recorded response, once answered.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<String>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

/// Status projection returned by `get_user_query_status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueryStatusView {
    /// Query ID.
    pub query_id: String,
    /// Lifecycle status.
    pub status: UserQueryStatus,
    /// Recorded response, once answered.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<String>,
}
