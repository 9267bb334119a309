//! Schema migrations, gated on `PRAGMA user_version`.

use rusqlite::Connection;

use crate::errors::Result;

/// Latest schema version.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE conversations (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'created',
    management_mode     TEXT NOT NULL DEFAULT 'internal',
    initiating_agent_id TEXT,
    agents_json         TEXT NOT NULL,
    agent_configs_json  TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE turns (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    agent_id        TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'in_progress',
    content         TEXT NOT NULL DEFAULT '',
    metadata_json   TEXT,
    is_final_turn   INTEGER NOT NULL DEFAULT 0,
    started_at      TEXT NOT NULL,
    completed_at    TEXT
);
CREATE INDEX idx_turns_conversation ON turns(conversation_id, started_at);
CREATE INDEX idx_turns_status ON turns(conversation_id, status);

CREATE TABLE trace_entries (
    id              TEXT PRIMARY KEY,
    turn_id         TEXT NOT NULL REFERENCES turns(id),
    conversation_id TEXT NOT NULL,
    agent_id        TEXT NOT NULL,
    entry_type      TEXT NOT NULL,
    entry_json      TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX idx_trace_turn ON trace_entries(turn_id, id);

CREATE TABLE agent_tokens (
    token           TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    agent_id        TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    expires_at      TEXT,
    UNIQUE(conversation_id, agent_id)
);

CREATE TABLE user_queries (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    agent_id        TEXT NOT NULL,
    question        TEXT NOT NULL,
    context_json    TEXT NOT NULL DEFAULT '{}',
    status          TEXT NOT NULL DEFAULT 'pending',
    response        TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX idx_queries_pending ON user_queries(status, conversation_id);

CREATE TABLE scenarios (
    id          TEXT NOT NULL,
    version_id  TEXT NOT NULL,
    name        TEXT NOT NULL,
    config_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (id, version_id)
);
";

/// Apply any pending migrations. Returns the resulting schema version.
pub fn run_migrations(conn: &Connection) -> Result<i64> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::connection::{ConnectionConfig, new_in_memory};

    #[test]
    fn migrations_apply_once() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), SCHEMA_VERSION);
        // Idempotent.
        assert_eq!(run_migrations(&conn).unwrap(), SCHEMA_VERSION);

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn tables_exist_after_migration() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        let _ = run_migrations(&conn).unwrap();

        for table in [
            "conversations",
            "turns",
            "trace_entries",
            "agent_tokens",
            "user_queries",
            "scenarios",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
