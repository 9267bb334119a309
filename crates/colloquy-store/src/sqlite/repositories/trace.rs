//! Trace repository: append-only audit entries under a turn.
//!
//! The full entry (ID, agent, timestamp, tagged payload) is stored as one
//! JSON column; `entry_type` is split out for filtering. Ordering within
//! a turn is insertion order, which UUIDv7 entry IDs preserve.

use rusqlite::{Connection, params};

use colloquy_core::turn::TraceEntry;

use crate::errors::Result;

/// Trace repository: stateless, every method takes `&Connection`.
pub struct TraceRepo;

impl TraceRepo {
    /// Append an entry under a turn.
    pub fn insert(
        conn: &Connection,
        conversation_id: &str,
        turn_id: &str,
        entry: &TraceEntry,
    ) -> Result<()> {
        let entry_json = serde_json::to_string(entry)?;
        let _ = conn.execute(
            "INSERT INTO trace_entries
             (id, turn_id, conversation_id, agent_id, entry_type, entry_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                turn_id,
                conversation_id,
                entry.agent_id,
                entry.payload.type_name(),
                entry_json,
                entry.timestamp,
            ],
        )?;
        Ok(())
    }

    /// All entries for a turn, in insertion order.
    pub fn for_turn(conn: &Connection, turn_id: &str) -> Result<Vec<TraceEntry>> {
        let mut stmt = conn.prepare(
            "SELECT entry_json FROM trace_entries WHERE turn_id = ?1 ORDER BY id",
        )?;
        let jsons = stmt
            .query_map(params![turn_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(jsons.len());
        for json in jsons {
            entries.push(serde_json::from_str(&json)?);
        }
        Ok(entries)
    }
}
