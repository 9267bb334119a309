//! Store error types.

use thiserror::Error;

/// Convenience result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool exhausted or broken.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Stored JSON failed to (de)serialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Referenced row does not exist.
    #[error("{what} {id} not found")]
    NotFound {
        /// Entity kind ("conversation", "turn", …).
        what: &'static str,
        /// Entity ID.
        id: String,
    },

    /// Stored data violated an internal invariant (e.g. an
    /// unparseable status string).
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }
}
