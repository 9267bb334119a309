//! User-query repository.

use rusqlite::{Connection, OptionalExtension, params};

use colloquy_core::query::{UserQuery, UserQueryStatus};

use crate::errors::{Result, StoreError};

/// Raw user-query row.
#[derive(Debug, Clone)]
pub struct QueryRow {
    /// Query ID.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Asking agent.
    pub agent_id: String,
    /// Question text.
    pub question: String,
    /// Context JSON.
    pub context_json: String,
    /// Status string.
    pub status: String,
    /// Recorded response.
    pub response: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl QueryRow {
    /// Rebuild the domain query.
    pub fn into_query(self) -> Result<UserQuery> {
        let status = UserQueryStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Internal(format!("bad query status {}", self.status)))?;
        let context = serde_json::from_str(&self.context_json)?;
        Ok(UserQuery {
            id: self.id,
            conversation_id: self.conversation_id,
            agent_id: self.agent_id,
            question: self.question,
            context,
            status,
            response: self.response,
            created_at: self.created_at,
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryRow> {
    Ok(QueryRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        agent_id: row.get(2)?,
        question: row.get(3)?,
        context_json: row.get(4)?,
        status: row.get(5)?,
        response: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const COLUMNS: &str =
    "id, conversation_id, agent_id, question, context_json, status, response, created_at";

/// Query repository: stateless, every method takes `&Connection`.
pub struct QueryRepo;

impl QueryRepo {
    /// Insert a pending query.
    pub fn insert(conn: &Connection, query: &UserQuery) -> Result<()> {
        let context_json = serde_json::to_string(&query.context)?;
        let _ = conn.execute(
            "INSERT INTO user_queries
             (id, conversation_id, agent_id, question, context_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                query.id,
                query.conversation_id,
                query.agent_id,
                query.question,
                context_json,
                query.status.as_str(),
                query.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a query by ID.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<UserQuery>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM user_queries WHERE id = ?1"),
                params![id],
                map_row,
            )
            .optional()?;
        row.map(QueryRow::into_query).transpose()
    }

    /// Record a response (status → answered). Returns `false` if the
    /// query does not exist or is no longer pending.
    pub fn answer(conn: &Connection, id: &str, response: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE user_queries SET status = 'answered', response = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![response, id],
        )?;
        Ok(changed > 0)
    }

    /// Force a status (used by external actors marking queries expired).
    pub fn update_status(conn: &Connection, id: &str, status: UserQueryStatus) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE user_queries SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Pending queries, scoped to one conversation or all.
    pub fn pending(conn: &Connection, conversation_id: Option<&str>) -> Result<Vec<UserQuery>> {
        let rows = match conversation_id {
            Some(cid) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM user_queries
                     WHERE status = 'pending' AND conversation_id = ?1
                     ORDER BY created_at, id"
                ))?;
                stmt.query_map(params![cid], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM user_queries
                     WHERE status = 'pending' ORDER BY created_at, id"
                ))?;
                stmt.query_map([], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(QueryRow::into_query).collect()
    }
}
