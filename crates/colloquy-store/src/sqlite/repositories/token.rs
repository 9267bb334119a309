//! Agent-token repository.
//!
//! One opaque token per (conversation, agent), enforced by a UNIQUE
//! constraint. Validation is a point lookup that treats an expired row
//! as absent; the explicit sweep deletes expired rows on request.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Identity a valid token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    /// Conversation the token is scoped to.
    pub conversation_id: String,
    /// Agent the token authenticates.
    pub agent_id: String,
}

/// Token repository: stateless, every method takes `&Connection`.
pub struct TokenRepo;

impl TokenRepo {
    /// Insert a freshly minted token.
    pub fn insert(
        conn: &Connection,
        token: &str,
        conversation_id: &str,
        agent_id: &str,
        created_at: &str,
        expires_at: Option<&str>,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO agent_tokens (token, conversation_id, agent_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![token, conversation_id, agent_id, created_at, expires_at],
        )?;
        Ok(())
    }

    /// Resolve a token to its identity. Expired tokens resolve to `None`.
    pub fn validate(conn: &Connection, token: &str, now: &str) -> Result<Option<TokenIdentity>> {
        let row = conn
            .query_row(
                "SELECT conversation_id, agent_id FROM agent_tokens
                 WHERE token = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![token, now],
                |row| {
                    Ok(TokenIdentity {
                        conversation_id: row.get(0)?,
                        agent_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Delete expired tokens. Returns how many were removed.
    pub fn delete_expired(conn: &Connection, now: &str) -> Result<u64> {
        let changed = conn.execute(
            "DELETE FROM agent_tokens WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        Ok(changed as u64)
    }

    /// Live tokens for a conversation, keyed by agent ID.
    pub fn for_conversation(
        conn: &Connection,
        conversation_id: &str,
        now: &str,
    ) -> Result<std::collections::HashMap<String, String>> {
        let mut stmt = conn.prepare(
            "SELECT agent_id, token FROM agent_tokens
             WHERE conversation_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )?;
        let rows = stmt.query_map(params![conversation_id, now], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }
}
