//! In-process registry of open turns.
//!
//! The registry is the fast-path answer to "is this turn open":
//! `complete_turn` and `cancel_turn` consult it before touching the
//! durable record, and removal from it closes the turn for this
//! process. A turn absent from the registry is resolved against the
//! durable in-progress row instead, so an open turn survives a restart
//! and can still be completed or cancelled.

use std::collections::HashMap;

use serde_json::Value;

use colloquy_core::turn::{TurnShell, TurnStatus};

/// A turn currently accepted but not yet finalized.
#[derive(Clone, Debug)]
pub struct InProgressTurn {
    /// Turn ID.
    pub turn_id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Speaking agent.
    pub agent_id: String,
    /// ISO 8601 start timestamp.
    pub started_at: String,
    /// Caller-supplied metadata.
    pub metadata: Option<Value>,
}

impl InProgressTurn {
    /// Project into the shell carried by `trace_added` events.
    #[must_use]
    pub fn shell(&self) -> TurnShell {
        TurnShell {
            id: self.turn_id.clone(),
            conversation_id: self.conversation_id.clone(),
            agent_id: self.agent_id.clone(),
            timestamp: self.started_at.clone(),
            content: String::new(),
            metadata: self.metadata.clone(),
            status: TurnStatus::InProgress,
            started_at: self.started_at.clone(),
            completed_at: None,
            is_final_turn: false,
        }
    }
}

/// Map of open turns, keyed by turn ID.
#[derive(Default)]
pub struct TurnRegistry {
    open: HashMap<String, InProgressTurn>,
}

impl TurnRegistry {
    /// Record a freshly started turn.
    pub fn register(&mut self, turn: InProgressTurn) {
        let _ = self.open.insert(turn.turn_id.clone(), turn);
    }

    /// Close a turn. Returns the record if it was open.
    pub fn remove(&mut self, turn_id: &str) -> Option<InProgressTurn> {
        self.open.remove(turn_id)
    }

    /// Look up an open turn.
    #[must_use]
    pub fn get(&self, turn_id: &str) -> Option<&InProgressTurn> {
        self.open.get(turn_id)
    }

    /// Whether the turn is open.
    #[must_use]
    pub fn contains(&self, turn_id: &str) -> bool {
        self.open.contains_key(turn_id)
    }

    /// Number of open turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Whether no turns are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Drop every open turn.
    pub fn clear(&mut self) {
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(turn_id: &str) -> InProgressTurn {
        InProgressTurn {
            turn_id: turn_id.into(),
            conversation_id: "conv_1".into(),
            agent_id: "agent-a".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            metadata: None,
        }
    }

    #[test]
    fn register_remove_round_trip() {
        let mut registry = TurnRegistry::default();
        registry.register(turn("turn_1"));
        assert!(registry.contains("turn_1"));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("turn_1").unwrap();
        assert_eq!(removed.agent_id, "agent-a");
        // Removal is the close point; a second close finds nothing.
        assert!(registry.remove("turn_1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn shell_reports_in_progress() {
        let shell = turn("turn_1").shell();
        assert_eq!(shell.status, TurnStatus::InProgress);
        assert!(shell.content.is_empty());
        assert!(shell.completed_at.is_none());
        assert_eq!(shell.timestamp, shell.started_at);
    }
}
