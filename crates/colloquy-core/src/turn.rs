//! Turn and trace-entry types.
//!
//! A [`Turn`] is one agent's atomic contribution to a conversation. While
//! open it accumulates [`TraceEntry`] audit records (thoughts, tool calls,
//! tool results); completion stamps the final content and closes the turn
//! to further entries. A [`TurnShell`] is the same record without the
//! trace vector: the cheap payload for incremental `trace_added` events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turn lifecycle status. One-way from `in_progress`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Accepted but not yet finalized.
    InProgress,
    /// Finalized with content.
    Completed,
    /// Abandoned. Advisory: the owning agent must observe the
    /// cancellation event itself.
    Cancelled,
}

impl TurnStatus {
    /// Stable string form (stored as TEXT).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Variant data of a trace entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TracePayload {
    /// Reasoning step.
    Thought {
        /// Thought text.
        content: String,
    },
    /// Tool invocation request.
    ToolCall {
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Invocation arguments.
        parameters: Value,
        /// Correlation ID pairing the call with its result.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },
    /// Result of a prior tool invocation.
    ToolResult {
        /// Correlation ID of the originating call.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool output.
        result: Value,
        /// Error message when the invocation failed.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
}

impl TracePayload {
    /// Discriminator string (`thought`, `tool_call`, `tool_result`).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// One audit record within a turn.
///
/// Entries belong exclusively to the turn they were recorded under; once
/// that turn completes, no further entries may attach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    /// Entry ID (`trace_…`).
    pub id: String,
    /// Agent that produced the entry.
    pub agent_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Variant data.
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// One agent's atomic contribution to a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Turn ID (`turn_…`).
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Speaking agent.
    pub agent_id: String,
    /// ISO 8601 timestamp (completion time once completed).
    pub timestamp: String,
    /// Final content. Empty until completion.
    pub content: String,
    /// Caller-supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Value>,
    /// Lifecycle status.
    pub status: TurnStatus,
    /// ISO 8601 start timestamp.
    pub started_at: String,
    /// ISO 8601 completion timestamp.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<String>,
    /// Ordered trace entries.
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
    /// Whether the agent declared this its final turn.
    #[serde(default)]
    pub is_final_turn: bool,
}

impl Turn {
    /// Project the turn into a shell (drops the trace vector).
    #[must_use]
    pub fn shell(&self) -> TurnShell {
        TurnShell {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            agent_id: self.agent_id.clone(),
            timestamp: self.timestamp.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            status: self.status,
            started_at: self.started_at.clone(),
            completed_at: self.completed_at.clone(),
            is_final_turn: self.is_final_turn,
        }
    }
}

/// A turn without its trace vector: cheap event payload enabling
/// incremental UI updates without a refetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnShell {
    /// Turn ID.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Speaking agent.
    pub agent_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Content so far (empty while in progress).
    pub content: String,
    /// Caller-supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<Value>,
    /// Lifecycle status.
    pub status: TurnStatus,
    /// ISO 8601 start timestamp.
    pub started_at: String,
    /// ISO 8601 completion timestamp.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<String>,
    /// Whether the agent declared this its final turn.
    #[serde(default)]
    pub is_final_turn: bool,
}
