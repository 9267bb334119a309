//! Conversation repository: CRUD for the `conversations` table.
//!
//! Agent identities and per-agent configs are stored as JSON columns;
//! turns live in their own table and are joined in by the store facade.

use rusqlite::{Connection, OptionalExtension, params};

use colloquy_core::conversation::{
    AgentConfig, AgentId, Conversation, ConversationMetadata, ConversationStatus, ManagementMode,
};
use colloquy_core::turn::Turn;

use crate::errors::{Result, StoreError};

/// Raw conversation row.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    /// Conversation ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Status string.
    pub status: String,
    /// Management mode string.
    pub management_mode: String,
    /// Initiating agent, if declared.
    pub initiating_agent_id: Option<String>,
    /// JSON array of [`AgentId`].
    pub agents_json: String,
    /// JSON array of [`AgentConfig`].
    pub agent_configs_json: String,
    /// Creation timestamp.
    pub created_at: String,
}

impl ConversationRow {
    /// Rebuild the domain object, attaching the given completed turns.
    pub fn into_conversation(self, turns: Vec<Turn>) -> Result<Conversation> {
        let status = ConversationStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Internal(format!("bad conversation status {}", self.status)))?;
        let management_mode = ManagementMode::parse(&self.management_mode).ok_or_else(|| {
            StoreError::Internal(format!("bad management mode {}", self.management_mode))
        })?;
        let agents: Vec<AgentId> = serde_json::from_str(&self.agents_json)?;
        let agent_configs: Vec<AgentConfig> = serde_json::from_str(&self.agent_configs_json)?;

        Ok(Conversation {
            id: self.id,
            name: self.name,
            created_at: self.created_at,
            agents,
            turns,
            status,
            metadata: ConversationMetadata {
                agent_configs,
                management_mode,
                initiating_agent_id: self.initiating_agent_id,
            },
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        management_mode: row.get(3)?,
        initiating_agent_id: row.get(4)?,
        agents_json: row.get(5)?,
        agent_configs_json: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const COLUMNS: &str = "id, name, status, management_mode, initiating_agent_id, \
                       agents_json, agent_configs_json, created_at";

/// Conversation repository: stateless, every method takes `&Connection`.
pub struct ConversationRepo;

impl ConversationRepo {
    /// Insert a new conversation.
    pub fn insert(conn: &Connection, conversation: &Conversation) -> Result<()> {
        let agents_json = serde_json::to_string(&conversation.agents)?;
        let agent_configs_json = serde_json::to_string(&conversation.metadata.agent_configs)?;
        let _ = conn.execute(
            "INSERT INTO conversations
             (id, name, status, management_mode, initiating_agent_id,
              agents_json, agent_configs_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conversation.id,
                conversation.name,
                conversation.status.as_str(),
                conversation.metadata.management_mode.as_str(),
                conversation.metadata.initiating_agent_id,
                agents_json,
                agent_configs_json,
                conversation.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a conversation row by ID.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Current status only (cheap point lookup for guard clauses).
    pub fn get_status(conn: &Connection, id: &str) -> Result<Option<ConversationStatus>> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            None => Ok(None),
            Some(s) => ConversationStatus::parse(&s)
                .map(Some)
                .ok_or_else(|| StoreError::Internal(format!("bad conversation status {s}"))),
        }
    }

    /// List conversations, newest first.
    pub fn list(conn: &Connection, limit: u32, offset: u32) -> Result<Vec<ConversationRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM conversations
             ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit, offset], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total conversation count.
    pub fn count(conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// Update status. Returns `false` if the conversation does not exist.
    pub fn update_status(conn: &Connection, id: &str, status: ConversationStatus) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE conversations SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }
}
