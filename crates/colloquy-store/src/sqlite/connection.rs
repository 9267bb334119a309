//! Connection pooling.
//!
//! File-backed databases run in WAL mode with foreign keys enforced.
//! In-memory databases use a uniquely named shared-cache URI so every
//! pooled connection sees the same database: plain `:memory:` would
//! give each connection its own.

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use uuid::Uuid;

use crate::errors::Result;

/// Pool of SQLite connections.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool sizing and busy handling.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionConfig {
    /// Maximum pooled connections.
    pub max_size: u32,
    /// Per-connection `busy_timeout` in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

fn build_pool(manager: SqliteConnectionManager, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let busy_timeout_ms = config.busy_timeout_ms;
    let manager = manager.with_init(move |conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
        Ok(())
    });
    Ok(r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?)
}

/// Open (or create) a file-backed database pool.
pub fn open(path: &Path, config: &ConnectionConfig) -> Result<ConnectionPool> {
    build_pool(SqliteConnectionManager::file(path), config)
}

/// Create a private in-memory database pool (shared across the pool's
/// connections, dropped when the pool is).
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    let uri = format!("file:memdb_{}?mode=memory&cache=shared", Uuid::now_v7().simple());
    let manager = SqliteConnectionManager::file(uri).with_flags(
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    );
    build_pool(manager, config)
}
