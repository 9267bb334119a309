//! Turn repository: CRUD for the `turns` table.
//!
//! A turn is inserted as `in_progress` with empty content; completion
//! stamps content, `completed_at`, and the final-turn flag in one UPDATE
//! guarded on the current status, so a completed or cancelled turn can
//! never be completed again at the SQL level.

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use colloquy_core::turn::{Turn, TurnShell, TurnStatus};

use crate::errors::{Result, StoreError};

/// Raw turn row.
#[derive(Debug, Clone)]
pub struct TurnRow {
    /// Turn ID.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Speaking agent.
    pub agent_id: String,
    /// Status string.
    pub status: String,
    /// Content (empty while in progress).
    pub content: String,
    /// Caller metadata JSON.
    pub metadata_json: Option<String>,
    /// Final-turn flag.
    pub is_final_turn: bool,
    /// Start timestamp.
    pub started_at: String,
    /// Completion timestamp.
    pub completed_at: Option<String>,
}

impl TurnRow {
    fn parsed_status(&self) -> Result<TurnStatus> {
        TurnStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Internal(format!("bad turn status {}", self.status)))
    }

    fn parsed_metadata(&self) -> Result<Option<Value>> {
        Ok(match &self.metadata_json {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        })
    }

    /// Rebuild the domain turn, attaching the given trace.
    pub fn into_turn(self, trace: Vec<colloquy_core::turn::TraceEntry>) -> Result<Turn> {
        let status = self.parsed_status()?;
        let metadata = self.parsed_metadata()?;
        let timestamp = self
            .completed_at
            .clone()
            .unwrap_or_else(|| self.started_at.clone());
        Ok(Turn {
            id: self.id,
            conversation_id: self.conversation_id,
            agent_id: self.agent_id,
            timestamp,
            content: self.content,
            metadata,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            trace,
            is_final_turn: self.is_final_turn,
        })
    }

    /// Rebuild a shell (no trace) from the row.
    pub fn to_shell(&self) -> Result<TurnShell> {
        let status = self.parsed_status()?;
        let metadata = self.parsed_metadata()?;
        let timestamp = self
            .completed_at
            .clone()
            .unwrap_or_else(|| self.started_at.clone());
        Ok(TurnShell {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            agent_id: self.agent_id.clone(),
            timestamp,
            content: self.content.clone(),
            metadata,
            status,
            started_at: self.started_at.clone(),
            completed_at: self.completed_at.clone(),
            is_final_turn: self.is_final_turn,
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRow> {
    Ok(TurnRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        agent_id: row.get(2)?,
        status: row.get(3)?,
        content: row.get(4)?,
        metadata_json: row.get(5)?,
        is_final_turn: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

const COLUMNS: &str = "id, conversation_id, agent_id, status, content, metadata_json, \
                       is_final_turn, started_at, completed_at";

/// Turn repository: stateless, every method takes `&Connection`.
pub struct TurnRepo;

impl TurnRepo {
    /// Insert a fresh in-progress turn.
    pub fn insert_in_progress(
        conn: &Connection,
        turn_id: &str,
        conversation_id: &str,
        agent_id: &str,
        metadata: Option<&Value>,
        started_at: &str,
    ) -> Result<()> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        let _ = conn.execute(
            "INSERT INTO turns (id, conversation_id, agent_id, status, metadata_json, started_at)
             VALUES (?1, ?2, ?3, 'in_progress', ?4, ?5)",
            params![turn_id, conversation_id, agent_id, metadata_json, started_at],
        )?;
        Ok(())
    }

    /// Complete an in-progress turn. Returns `false` if the turn does not
    /// exist or is no longer in progress.
    pub fn complete(
        conn: &Connection,
        turn_id: &str,
        content: &str,
        is_final_turn: bool,
        completed_at: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE turns
             SET status = 'completed', content = ?1, is_final_turn = ?2, completed_at = ?3
             WHERE id = ?4 AND status = 'in_progress'",
            params![content, is_final_turn, completed_at, turn_id],
        )?;
        Ok(changed > 0)
    }

    /// Move an in-progress turn to `cancelled`. Returns `false` if the
    /// turn does not exist or is no longer in progress.
    pub fn cancel(conn: &Connection, turn_id: &str, cancelled_at: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE turns
             SET status = 'cancelled', completed_at = ?1
             WHERE id = ?2 AND status = 'in_progress'",
            params![cancelled_at, turn_id],
        )?;
        Ok(changed > 0)
    }

    /// Get a turn row by ID.
    pub fn get(conn: &Connection, turn_id: &str) -> Result<Option<TurnRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM turns WHERE id = ?1"),
                params![turn_id],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Completed turns for a conversation, in completion order.
    pub fn completed_for_conversation(
        conn: &Connection,
        conversation_id: &str,
    ) -> Result<Vec<TurnRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM turns
             WHERE conversation_id = ?1 AND status = 'completed'
             ORDER BY completed_at, id"
        ))?;
        let rows = stmt
            .query_map(params![conversation_id], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Open turns for a conversation, in start order.
    pub fn in_progress_for_conversation(
        conn: &Connection,
        conversation_id: &str,
    ) -> Result<Vec<TurnRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM turns
             WHERE conversation_id = ?1 AND status = 'in_progress'
             ORDER BY started_at, id"
        ))?;
        let rows = stmt
            .query_map(params![conversation_id], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
