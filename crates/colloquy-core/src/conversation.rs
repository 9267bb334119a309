//! Conversation, agent identity, and per-agent configuration types.
//!
//! A [`Conversation`] is a bounded multi-agent dialogue session. Its
//! status is monotonic: `created → active → completed`, never backwards.
//! `active` is reached either explicitly (`start_conversation` on an
//! internally managed conversation) or implicitly (first completed turn
//! of an externally managed one).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::turn::Turn;

/// Identity of a participating agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentId {
    /// Stable agent identifier (unique within a conversation).
    pub id: String,
    /// Human-readable display name.
    pub label: String,
    /// Role hint (e.g. "initiator", "responder").
    pub role: String,
}

/// One scripted exchange for a static-replay agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Substring that triggers this step.
    pub trigger: String,
    /// Canned reply emitted when triggered.
    pub response: String,
}

/// Behavior strategy driving an agent instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategyType", rename_all = "snake_case")]
pub enum AgentStrategy {
    /// Behavior derived from a versioned scenario document resolved
    /// from the store at provisioning time.
    ScenarioDriven {
        /// Scenario to load.
        #[serde(rename = "scenarioId")]
        scenario_id: String,
        /// Pinned scenario version; latest when `None`.
        #[serde(rename = "scenarioVersionId", skip_serializing_if = "Option::is_none")]
        scenario_version_id: Option<String>,
    },
    /// Deterministic trigger/response script (test and demo agents).
    StaticReplay {
        /// Ordered script steps.
        script: Vec<ScriptStep>,
    },
    /// Placeholder for an agent driven by an external process over
    /// the transport layer; the orchestrator never provisions these.
    ExternalProxy {
        /// Identifier of the external service.
        #[serde(rename = "externalId")]
        external_id: String,
    },
}

/// Full configuration for one agent in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identity.
    #[serde(rename = "agentId")]
    pub agent_id: AgentId,
    /// Behavior strategy.
    #[serde(flatten)]
    pub strategy: AgentStrategy,
    /// Message the agent opens with when it is the initiating agent.
    #[serde(
        rename = "openingMessage",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub opening_message: Option<String>,
}

/// Who drives agent provisioning for a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagementMode {
    /// The orchestrator constructs and drives the agents itself.
    Internal,
    /// An external process drives the agents over the transport layer.
    External,
}

impl ManagementMode {
    /// Stable string form (stored as TEXT).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

/// Conversation lifecycle status. One-way: created → active → completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Persisted but not yet running.
    Created,
    /// Turns are being taken.
    Active,
    /// Terminal.
    Completed,
}

impl ConversationStatus {
    /// Stable string form (stored as TEXT).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Parse from the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Whether `next` is a legal forward transition from `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Active)
                | (Self::Created, Self::Completed)
                | (Self::Active, Self::Completed)
        )
    }
}

/// Conversation metadata: per-agent configuration plus provisioning mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    /// Configuration for every declared agent, in declaration order.
    pub agent_configs: Vec<AgentConfig>,
    /// Provisioning mode.
    pub management_mode: ManagementMode,
    /// Agent expected to open the conversation, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub initiating_agent_id: Option<String>,
}

/// A bounded multi-agent dialogue session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation ID (`conv_…`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// Participating agent identities, in declaration order.
    pub agents: Vec<AgentId>,
    /// Completed turns in completion order. Empty until turns finish.
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Lifecycle status.
    pub status: ConversationStatus,
    /// Agent configuration and provisioning metadata.
    pub metadata: ConversationMetadata,
}

/// Request to create a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Display name.
    pub name: String,
    /// Provisioning mode (defaults to internal).
    #[serde(default = "default_management_mode")]
    pub management_mode: ManagementMode,
    /// Declared agents.
    pub agents: Vec<AgentConfig>,
    /// Agent expected to open the conversation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub initiating_agent_id: Option<String>,
}

fn default_management_mode() -> ManagementMode {
    ManagementMode::Internal
}

/// Response from creating a conversation: the conversation plus one
/// freshly minted opaque token per declared agent, keyed by agent ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    /// The created conversation (status `created`).
    pub conversation: Conversation,
    /// agent ID → opaque auth token.
    pub agent_tokens: HashMap<String, String>,
}

/// Cheap conversation summary carried in `conversation_created` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Conversation ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provisioning mode.
    pub management_mode: ManagementMode,
    /// Participating agent IDs.
    pub agents: Vec<String>,
    /// Lifecycle status at emission time.
    pub status: ConversationStatus,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
}

impl Conversation {
    /// Summary carried in the `conversation_created` event.
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            management_mode: self.metadata.management_mode,
            agents: self.agents.iter().map(|a| a.id.clone()).collect(),
            status: self.status,
            created_at: self.created_at.clone(),
        }
    }
}

/// Versioned scenario document resolved for scenario-driven agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfiguration {
    /// Scenario ID (`scn_…`).
    pub id: String,
    /// Version identifier within the scenario.
    pub version_id: String,
    /// Display name.
    pub name: String,
    /// Opaque scenario body consumed by the agent strategy.
    pub config: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ConversationStatus::Created,
            ConversationStatus::Active,
            ConversationStatus::Completed,
        ] {
            assert_eq!(ConversationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ConversationStatus::parse("paused"), None);
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use ConversationStatus::{Active, Completed, Created};
        assert!(Created.can_transition_to(Active));
        assert!(Created.can_transition_to(Completed));
        assert!(Active.can_transition_to(Completed));

        assert!(!Active.can_transition_to(Created));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Created));
        assert!(!Created.can_transition_to(Created));
    }

    #[test]
    fn agent_config_serializes_with_flattened_strategy() {
        let config = AgentConfig {
            agent_id: AgentId {
                id: "agent-a".into(),
                label: "Agent A".into(),
                role: "responder".into(),
            },
            strategy: AgentStrategy::ScenarioDriven {
                scenario_id: "scn_1".into(),
                scenario_version_id: None,
            },
            opening_message: None,
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["strategyType"], "scenario_driven");
        assert_eq!(value["scenarioId"], "scn_1");
        assert_eq!(value["agentId"]["id"], "agent-a");
        assert!(value.get("openingMessage").is_none());
    }

    #[test]
    fn create_request_defaults_to_internal_mode() {
        let request: CreateConversationRequest = serde_json::from_value(json!({
            "name": "test",
            "agents": [],
        }))
        .unwrap();
        assert_eq!(request.management_mode, ManagementMode::Internal);
    }

    #[test]
    fn summary_projects_agent_ids() {
        let conversation = Conversation {
            id: "conv_1".into(),
            name: "demo".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            agents: vec![
                AgentId {
                    id: "a".into(),
                    label: "A".into(),
                    role: "initiator".into(),
                },
                AgentId {
                    id: "b".into(),
                    label: "B".into(),
                    role: "responder".into(),
                },
            ],
            turns: vec![],
            status: ConversationStatus::Created,
            metadata: ConversationMetadata {
                agent_configs: vec![],
                management_mode: ManagementMode::External,
                initiating_agent_id: None,
            },
        };

        let summary = conversation.summary();
        assert_eq!(summary.agents, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(summary.management_mode, ManagementMode::External);
    }
}
