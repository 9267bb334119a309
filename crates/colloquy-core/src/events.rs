//! The live conversation-event taxonomy.
//!
//! [`ConversationEvent`] is broadcast synchronously and in-process by the
//! orchestrator: no queueing, no replay. Every variant embeds a
//! flattened [`BaseEvent`] so the wire shape is
//! `{type, conversationId, timestamp, …}` with per-type data fields.
//!
//! Subscription filters key off [`ConversationEvent::event_type`] and the
//! canonical agent-attribution rule in [`ConversationEvent::agent_id`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::ConversationSummary;
use crate::turn::{Turn, TurnShell};

/// Common fields for every conversation event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Conversation this event belongs to.
    pub conversation_id: String,
    /// ISO 8601 emission timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a base event with the current UTC timestamp.
    #[must_use]
    pub fn now(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Query summary carried in `user_query_created` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueryNotice {
    /// Query ID.
    pub query_id: String,
    /// Asking agent.
    pub agent_id: String,
    /// Question text.
    pub question: String,
    /// Context to echo back with the answer.
    pub context: Value,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

/// A live event on a conversation's stream. Exhaustive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A conversation was persisted in status `created`.
    ConversationCreated {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Summary of the new conversation.
        conversation: ConversationSummary,
    },

    /// All agents have been attempted for provisioning.
    ConversationReady {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// The conversation reached its terminal `completed` status.
    ConversationEnded {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// An agent opened a turn. Carries a shell with empty content/trace.
    TurnStarted {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The open turn (empty content, empty trace).
        turn: Turn,
    },

    /// A trace entry attached to a turn. Carries a cheap turn shell plus
    /// the new entry only: subscribers update incrementally.
    TraceAdded {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Shell of the owning turn.
        turn: TurnShell,
        /// The new entry.
        trace: crate::turn::TraceEntry,
    },

    /// Type-specific companion of a `thought` trace entry.
    AgentThinking {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Thinking agent.
        #[serde(rename = "agentId")]
        agent_id: String,
        /// Thought text.
        thought: String,
    },

    /// Type-specific companion of a `tool_call` trace entry.
    ToolExecuting {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Calling agent.
        #[serde(rename = "agentId")]
        agent_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Invocation arguments.
        parameters: Value,
    },

    /// A turn was finalized. The sole authoritative "agent finished
    /// speaking" signal; carries the full turn including its trace.
    TurnCompleted {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The completed turn, trace included.
        turn: Turn,
    },

    /// A turn was cancelled. Advisory: the owning agent must observe
    /// this event itself.
    TurnCancelled {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Cancelled turn.
        #[serde(rename = "turnId")]
        turn_id: String,
        /// Agent that owned the turn.
        #[serde(rename = "agentId")]
        agent_id: String,
    },

    /// An agent asked the user a question.
    UserQueryCreated {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The pending query.
        query: UserQueryNotice,
    },

    /// A user query was answered.
    UserQueryAnswered {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Answered query.
        #[serde(rename = "queryId")]
        query_id: String,
        /// Recorded response.
        response: String,
        /// Context supplied when the query was created.
        context: Value,
    },
}

impl ConversationEvent {
    /// Event-type discriminator string, as used in subscription filters.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationCreated { .. } => "conversation_created",
            Self::ConversationReady { .. } => "conversation_ready",
            Self::ConversationEnded { .. } => "conversation_ended",
            Self::TurnStarted { .. } => "turn_started",
            Self::TraceAdded { .. } => "trace_added",
            Self::AgentThinking { .. } => "agent_thinking",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnCancelled { .. } => "turn_cancelled",
            Self::UserQueryCreated { .. } => "user_query_created",
            Self::UserQueryAnswered { .. } => "user_query_answered",
        }
    }

    /// Conversation the event belongs to.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.base().conversation_id
    }

    /// ISO 8601 emission timestamp.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.base().timestamp
    }

    /// The owning agent, where the event type has one.
    ///
    /// Canonical extraction rule used by agent-scoped subscription
    /// filters: turn events attribute to `turn.agent_id`, trace
    /// companions and cancellations carry `agent_id` directly, query
    /// creation attributes to the asking agent. Lifecycle events and
    /// `user_query_answered` have no owning agent and always pass agent
    /// filters.
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::TurnStarted { turn, .. } | Self::TurnCompleted { turn, .. } => {
                Some(&turn.agent_id)
            }
            Self::TraceAdded { turn, .. } => Some(&turn.agent_id),
            Self::AgentThinking { agent_id, .. }
            | Self::ToolExecuting { agent_id, .. }
            | Self::TurnCancelled { agent_id, .. } => Some(agent_id),
            Self::UserQueryCreated { query, .. } => Some(&query.agent_id),
            Self::ConversationCreated { .. }
            | Self::ConversationReady { .. }
            | Self::ConversationEnded { .. }
            | Self::UserQueryAnswered { .. } => None,
        }
    }

    fn base(&self) -> &BaseEvent {
        match self {
            Self::ConversationCreated { base, .. }
            | Self::ConversationReady { base }
            | Self::ConversationEnded { base }
            | Self::TurnStarted { base, .. }
            | Self::TraceAdded { base, .. }
            | Self::AgentThinking { base, .. }
            | Self::ToolExecuting { base, .. }
            | Self::TurnCompleted { base, .. }
            | Self::TurnCancelled { base, .. }
            | Self::UserQueryCreated { base, .. }
            | Self::UserQueryAnswered { base, .. } => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::TurnStatus;
    use serde_json::json;

    fn sample_turn(agent_id: &str) -> Turn {
        Turn {
            id: "turn_1".into(),
            conversation_id: "conv_1".into(),
            agent_id: agent_id.into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            content: String::new(),
            metadata: None,
            status: TurnStatus::InProgress,
            started_at: "2026-01-01T00:00:00Z".into(),
            completed_at: None,
            trace: vec![],
            is_final_turn: false,
        }
    }

    #[test]
    fn event_type_strings_match_taxonomy() {
        let event = ConversationEvent::ConversationReady {
            base: BaseEvent::now("conv_1"),
        };
        assert_eq!(event.event_type(), "conversation_ready");
        assert_eq!(event.conversation_id(), "conv_1");
    }

    #[test]
    fn serializes_with_flattened_envelope() {
        let event = ConversationEvent::TurnStarted {
            base: BaseEvent {
                conversation_id: "conv_1".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
            },
            turn: sample_turn("agent-a"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "turn_started");
        assert_eq!(value["conversationId"], "conv_1");
        assert_eq!(value["timestamp"], "2026-01-01T00:00:00Z");
        assert_eq!(value["turn"]["agentId"], "agent-a");
    }

    #[test]
    fn deserializes_from_wire_format() {
        let event: ConversationEvent = serde_json::from_value(json!({
            "type": "agent_thinking",
            "conversationId": "conv_1",
            "timestamp": "2026-01-01T00:00:00Z",
            "agentId": "agent-a",
            "thought": "weighing options",
        }))
        .unwrap();
        assert_eq!(event.event_type(), "agent_thinking");
        assert_eq!(event.agent_id(), Some("agent-a"));
    }

    #[test]
    fn agent_attribution_rule() {
        let base = BaseEvent::now("conv_1");

        let started = ConversationEvent::TurnStarted {
            base: base.clone(),
            turn: sample_turn("agent-a"),
        };
        assert_eq!(started.agent_id(), Some("agent-a"));

        let cancelled = ConversationEvent::TurnCancelled {
            base: base.clone(),
            turn_id: "turn_1".into(),
            agent_id: "agent-b".into(),
        };
        assert_eq!(cancelled.agent_id(), Some("agent-b"));

        let created = ConversationEvent::UserQueryCreated {
            base: base.clone(),
            query: UserQueryNotice {
                query_id: "query_1".into(),
                agent_id: "agent-a".into(),
                question: "?".into(),
                context: json!({}),
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        };
        assert_eq!(created.agent_id(), Some("agent-a"));

        // Events without an owning agent.
        let ready = ConversationEvent::ConversationReady { base: base.clone() };
        assert_eq!(ready.agent_id(), None);

        let answered = ConversationEvent::UserQueryAnswered {
            base,
            query_id: "query_1".into(),
            response: "yes".into(),
            context: json!({}),
        };
        assert_eq!(answered.agent_id(), None);
    }

    #[test]
    fn trace_added_carries_shell_and_entry() {
        let turn = sample_turn("agent-a");
        let event = ConversationEvent::TraceAdded {
            base: BaseEvent::now("conv_1"),
            turn: turn.shell(),
            trace: crate::turn::TraceEntry {
                id: "trace_1".into(),
                agent_id: "agent-a".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
                payload: crate::turn::TracePayload::Thought {
                    content: "x".into(),
                },
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["turn"]["id"], "turn_1");
        assert!(value["turn"].get("trace").is_none());
        assert_eq!(value["trace"]["type"], "thought");
    }
}
