//! High-level transactional `ConversationStore` API.
//!
//! Composes the repositories into atomic, conversation-centric methods.
//! Every multi-statement write runs inside a single SQLite transaction;
//! callers never observe partial state.
//!
//! INVARIANT: writes for a given conversation are serialized through an
//! in-process per-conversation mutex; cross-conversation writes take a
//! global lock. The store is the single source of truth: the
//! orchestrator's caches are derived from it, never the reverse.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument};

use colloquy_core::conversation::{Conversation, ConversationStatus, ScenarioConfiguration};
use colloquy_core::query::{UserQuery, UserQueryStatus};
use colloquy_core::turn::{TraceEntry, Turn, TurnShell};

use crate::errors::{Result, StoreError};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations;
use crate::sqlite::repositories::conversation::ConversationRepo;
use crate::sqlite::repositories::query::QueryRepo;
use crate::sqlite::repositories::scenario::ScenarioRepo;
use crate::sqlite::repositories::token::TokenRepo;
use crate::sqlite::repositories::trace::TraceRepo;
use crate::sqlite::repositories::turn::{TurnRepo, TurnRow};

pub use crate::sqlite::repositories::token::TokenIdentity;

/// Token to mint alongside a new conversation.
#[derive(Debug, Clone)]
pub struct AgentTokenSpec {
    /// Opaque token string.
    pub token: String,
    /// Agent the token authenticates.
    pub agent_id: String,
    /// Optional expiry timestamp (RFC 3339).
    pub expires_at: Option<String>,
}

/// Options for listing conversations.
#[derive(Debug, Clone, Copy)]
pub struct ListConversationsOptions {
    /// Page size.
    pub limit: u32,
    /// Page offset.
    pub offset: u32,
    /// Attach completed turns to each conversation.
    pub include_turns: bool,
    /// Attach trace entries to each attached turn.
    pub include_trace: bool,
}

impl Default for ListConversationsOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            include_turns: false,
            include_trace: false,
        }
    }
}

/// One page of conversations plus the total count.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    /// Conversations in this page, newest first.
    pub conversations: Vec<Conversation>,
    /// Total conversations in the store.
    pub total: u64,
    /// Echoed page size.
    pub limit: u32,
    /// Echoed page offset.
    pub offset: u32,
}

/// High-level store wrapping a connection pool and all repositories.
pub struct ConversationStore {
    pool: ConnectionPool,
    global_write_lock: Mutex<()>,
    conversation_write_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl ConversationStore {
    const BUSY_MAX_RETRIES: u32 = 32;

    /// Open (or create) a file-backed store and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let pool = connection::open(path, &ConnectionConfig::default())?;
        Self::with_pool(pool)
    }

    /// Create an in-memory store (test and demo use).
    pub fn in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        Self::with_pool(pool)
    }

    /// Wrap an existing pool, running migrations.
    pub fn with_pool(pool: ConnectionPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            let _ = migrations::run_migrations(&conn)?;
        }
        Ok(Self {
            pool,
            global_write_lock: Mutex::new(()),
            conversation_write_locks: Mutex::new(HashMap::new()),
        })
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────
    // Write serialization
    // ─────────────────────────────────────────────────────────────────

    fn acquire_conversation_write_lock(&self, conversation_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .conversation_write_locks
            .lock()
            .map_err(|_| StoreError::Internal("conversation lock map poisoned".into()))?;

        // Opportunistically prune dead weak refs when the map grows.
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(conversation_id).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(conversation_id.to_string(), Arc::downgrade(&lock));
        Ok(lock)
    }

    fn with_conversation_write_lock<T>(
        &self,
        conversation_id: &str,
        f: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let lock = self.acquire_conversation_write_lock(conversation_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::Internal("conversation write lock poisoned".into()))?;
        Self::retry_on_busy(f)
    }

    fn with_global_write_lock<T>(&self, f: impl FnMut() -> Result<T>) -> Result<T> {
        let _guard = self
            .global_write_lock
            .lock()
            .map_err(|_| StoreError::Internal("global write lock poisoned".into()))?;
        Self::retry_on_busy(f)
    }

    /// Retry on `SQLITE_BUSY`/`SQLITE_LOCKED` with linear backoff and
    /// jitter, for databases shared with other processes.
    fn retry_on_busy<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if Self::is_busy_or_locked(&err) && attempts < Self::BUSY_MAX_RETRIES => {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_range = base_ms / 4;
                    let jitter = if jitter_range > 0 {
                        rand::random::<u64>() % (jitter_range * 2 + 1)
                    } else {
                        0
                    };
                    let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_busy_or_locked(err: &StoreError) -> bool {
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Conversation lifecycle
    // ─────────────────────────────────────────────────────────────────

    /// Persist a new conversation and mint its agent tokens atomically.
    #[instrument(skip(self, conversation, tokens), fields(conversation_id = %conversation.id))]
    pub fn create_conversation(
        &self,
        conversation: &Conversation,
        tokens: &[AgentTokenSpec],
    ) -> Result<()> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;

            ConversationRepo::insert(&tx, conversation)?;
            let now = chrono::Utc::now().to_rfc3339();
            for spec in tokens {
                TokenRepo::insert(
                    &tx,
                    &spec.token,
                    &conversation.id,
                    &spec.agent_id,
                    &now,
                    spec.expires_at.as_deref(),
                )?;
            }

            tx.commit()?;
            debug!(agents = tokens.len(), "conversation persisted");
            Ok(())
        })
    }

    /// Load a conversation, optionally with completed turns and traces.
    pub fn get_conversation(
        &self,
        id: &str,
        include_turns: bool,
        include_trace: bool,
    ) -> Result<Option<Conversation>> {
        let conn = self.conn()?;
        let Some(row) = ConversationRepo::get(&conn, id)? else {
            return Ok(None);
        };

        let turns = if include_turns {
            self.load_completed_turns(&conn, id, include_trace)?
        } else {
            Vec::new()
        };

        row.into_conversation(turns).map(Some)
    }

    fn load_completed_turns(
        &self,
        conn: &PooledConnection,
        conversation_id: &str,
        include_trace: bool,
    ) -> Result<Vec<Turn>> {
        let rows = TurnRepo::completed_for_conversation(conn, conversation_id)?;
        let mut turns = Vec::with_capacity(rows.len());
        for row in rows {
            let trace = if include_trace {
                TraceRepo::for_turn(conn, &row.id)?
            } else {
                Vec::new()
            };
            turns.push(row.into_turn(trace)?);
        }
        Ok(turns)
    }

    /// Current conversation status.
    pub fn conversation_status(&self, id: &str) -> Result<Option<ConversationStatus>> {
        let conn = self.conn()?;
        ConversationRepo::get_status(&conn, id)
    }

    /// List conversations, newest first, with the total count.
    pub fn list_conversations(&self, opts: &ListConversationsOptions) -> Result<ConversationPage> {
        let conn = self.conn()?;
        let rows = ConversationRepo::list(&conn, opts.limit, opts.offset)?;
        let total = ConversationRepo::count(&conn)?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            let turns = if opts.include_turns {
                let id = row.id.clone();
                self.load_completed_turns(&conn, &id, opts.include_trace)?
            } else {
                Vec::new()
            };
            conversations.push(row.into_conversation(turns)?);
        }

        Ok(ConversationPage {
            conversations,
            total,
            limit: opts.limit,
            offset: opts.offset,
        })
    }

    /// Update a conversation's status. Returns `false` on unknown ID.
    #[instrument(skip(self))]
    pub fn update_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> Result<bool> {
        self.with_conversation_write_lock(conversation_id, || {
            let conn = self.conn()?;
            ConversationRepo::update_status(&conn, conversation_id, status)
        })
    }

    // ─────────────────────────────────────────────────────────────────
    // Turn protocol
    // ─────────────────────────────────────────────────────────────────

    /// Durably record a fresh in-progress turn.
    #[instrument(skip(self, metadata))]
    pub fn start_turn(
        &self,
        turn_id: &str,
        conversation_id: &str,
        agent_id: &str,
        metadata: Option<&Value>,
        started_at: &str,
    ) -> Result<()> {
        self.with_conversation_write_lock(conversation_id, || {
            let conn = self.conn()?;
            TurnRepo::insert_in_progress(
                &conn,
                turn_id,
                conversation_id,
                agent_id,
                metadata,
                started_at,
            )
        })
    }

    /// Complete an in-progress turn and return the assembled turn with
    /// its full trace. `Ok(None)` when the turn does not exist or is no
    /// longer in progress.
    #[instrument(skip(self, content))]
    pub fn complete_turn(
        &self,
        conversation_id: &str,
        turn_id: &str,
        content: &str,
        is_final_turn: bool,
    ) -> Result<Option<Turn>> {
        self.with_conversation_write_lock(conversation_id, || {
            let conn = self.conn()?;
            let tx = conn.unchecked_transaction()?;

            let completed_at = chrono::Utc::now().to_rfc3339();
            if !TurnRepo::complete(&tx, turn_id, content, is_final_turn, &completed_at)? {
                return Ok(None);
            }

            let row = TurnRepo::get(&tx, turn_id)?
                .ok_or_else(|| StoreError::not_found("turn", turn_id))?;
            let trace = TraceRepo::for_turn(&tx, turn_id)?;
            let turn = row.into_turn(trace)?;

            tx.commit()?;
            Ok(Some(turn))
        })
    }

    /// Mark an in-progress turn cancelled. Returns `false` when the turn
    /// does not exist or is no longer in progress.
    #[instrument(skip(self))]
    pub fn cancel_turn(&self, conversation_id: &str, turn_id: &str) -> Result<bool> {
        self.with_conversation_write_lock(conversation_id, || {
            let conn = self.conn()?;
            let cancelled_at = chrono::Utc::now().to_rfc3339();
            TurnRepo::cancel(&conn, turn_id, &cancelled_at)
        })
    }

    /// Load a turn with its trace.
    pub fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        let conn = self.conn()?;
        let Some(row) = TurnRepo::get(&conn, turn_id)? else {
            return Ok(None);
        };
        let trace = TraceRepo::for_turn(&conn, turn_id)?;
        row.into_turn(trace).map(Some)
    }

    /// Shells of a conversation's open turns, in start order.
    pub fn in_progress_turns(&self, conversation_id: &str) -> Result<Vec<TurnShell>> {
        let conn = self.conn()?;
        TurnRepo::in_progress_for_conversation(&conn, conversation_id)?
            .iter()
            .map(TurnRow::to_shell)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────
    // Trace
    // ─────────────────────────────────────────────────────────────────

    /// Append a trace entry under a turn.
    #[instrument(skip(self, entry), fields(entry_type = entry.payload.type_name()))]
    pub fn add_trace_entry(
        &self,
        conversation_id: &str,
        turn_id: &str,
        entry: &TraceEntry,
    ) -> Result<()> {
        self.with_conversation_write_lock(conversation_id, || {
            let conn = self.conn()?;
            TraceRepo::insert(&conn, conversation_id, turn_id, entry)
        })
    }

    /// All trace entries for a turn, in insertion order.
    pub fn trace_for_turn(&self, turn_id: &str) -> Result<Vec<TraceEntry>> {
        let conn = self.conn()?;
        TraceRepo::for_turn(&conn, turn_id)
    }

    // ─────────────────────────────────────────────────────────────────
    // Tokens
    // ─────────────────────────────────────────────────────────────────

    /// Resolve a token to (conversation, agent). Expired or unknown
    /// tokens resolve to `None`.
    pub fn validate_token(&self, token: &str) -> Result<Option<TokenIdentity>> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        TokenRepo::validate(&conn, token, &now)
    }

    /// Live tokens for a conversation, keyed by agent ID. Used to
    /// rebuild the orchestrator's conversation cache after a restart.
    pub fn tokens_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        TokenRepo::for_conversation(&conn, conversation_id, &now)
    }

    /// Remove expired tokens. Returns how many were deleted.
    #[instrument(skip(self))]
    pub fn cleanup_expired_tokens(&self) -> Result<u64> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            let now = chrono::Utc::now().to_rfc3339();
            TokenRepo::delete_expired(&conn, &now)
        })
    }

    // ─────────────────────────────────────────────────────────────────
    // User queries
    // ─────────────────────────────────────────────────────────────────

    /// Persist a pending user query.
    #[instrument(skip(self, query), fields(query_id = %query.id))]
    pub fn create_user_query(&self, query: &UserQuery) -> Result<()> {
        let conversation_id = query.conversation_id.clone();
        self.with_conversation_write_lock(&conversation_id, || {
            let conn = self.conn()?;
            QueryRepo::insert(&conn, query)
        })
    }

    /// Load a query by ID.
    pub fn get_user_query(&self, query_id: &str) -> Result<Option<UserQuery>> {
        let conn = self.conn()?;
        QueryRepo::get(&conn, query_id)
    }

    /// Record a response (status → answered). Returns `false` when the
    /// query does not exist or is no longer pending.
    #[instrument(skip(self, response))]
    pub fn answer_user_query(&self, query_id: &str, response: &str) -> Result<bool> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            QueryRepo::answer(&conn, query_id, response)
        })
    }

    /// Force a query status (external expiry marking).
    pub fn update_query_status(&self, query_id: &str, status: UserQueryStatus) -> Result<bool> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            QueryRepo::update_status(&conn, query_id, status)
        })
    }

    /// Pending queries for one conversation, or all when `None`.
    pub fn pending_queries(&self, conversation_id: Option<&str>) -> Result<Vec<UserQuery>> {
        let conn = self.conn()?;
        QueryRepo::pending(&conn, conversation_id)
    }

    // ─────────────────────────────────────────────────────────────────
    // Scenarios
    // ─────────────────────────────────────────────────────────────────

    /// Insert a scenario version.
    pub fn insert_scenario(&self, scenario: &ScenarioConfiguration) -> Result<()> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            ScenarioRepo::insert(&conn, scenario)
        })
    }

    /// Find a scenario, pinned to a version or latest when `None`.
    pub fn find_scenario(
        &self,
        scenario_id: &str,
        version_id: Option<&str>,
    ) -> Result<Option<ScenarioConfiguration>> {
        let conn = self.conn()?;
        ScenarioRepo::find(&conn, scenario_id, version_id)
    }

    /// Release the store. Pooled connections close as they drop.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::conversation::{
        AgentConfig, AgentId, AgentStrategy, ConversationMetadata, ManagementMode, ScriptStep,
    };
    use colloquy_core::turn::TracePayload;
    use colloquy_core::{ids, query::UserQueryStatus};
    use serde_json::json;

    fn agent(id: &str) -> AgentId {
        AgentId {
            id: id.into(),
            label: id.to_uppercase(),
            role: "responder".into(),
        }
    }

    fn sample_conversation(mode: ManagementMode) -> Conversation {
        let agents = vec![agent("a"), agent("b")];
        let configs = agents
            .iter()
            .map(|a| AgentConfig {
                agent_id: a.clone(),
                strategy: AgentStrategy::StaticReplay {
                    script: vec![ScriptStep {
                        trigger: "hello".into(),
                        response: "hi".into(),
                    }],
                },
                opening_message: None,
            })
            .collect();
        Conversation {
            id: ids::conversation_id(),
            name: "test".into(),
            created_at: ids::now_rfc3339(),
            agents,
            turns: vec![],
            status: ConversationStatus::Created,
            metadata: ConversationMetadata {
                agent_configs: configs,
                management_mode: mode,
                initiating_agent_id: None,
            },
        }
    }

    fn store_with_conversation(mode: ManagementMode) -> (ConversationStore, Conversation) {
        let store = ConversationStore::in_memory().unwrap();
        let conversation = sample_conversation(mode);
        let tokens: Vec<AgentTokenSpec> = conversation
            .agents
            .iter()
            .map(|a| AgentTokenSpec {
                token: format!("tok-{}-{}", conversation.id, a.id),
                agent_id: a.id.clone(),
                expires_at: None,
            })
            .collect();
        store.create_conversation(&conversation, &tokens).unwrap();
        (store, conversation)
    }

    #[test]
    fn create_and_get_round_trips() {
        let (store, conversation) = store_with_conversation(ManagementMode::Internal);
        let loaded = store
            .get_conversation(&conversation.id, true, true)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, conversation.id);
        assert_eq!(loaded.status, ConversationStatus::Created);
        assert_eq!(loaded.agents.len(), 2);
        assert_eq!(loaded.metadata.management_mode, ManagementMode::Internal);
        assert!(loaded.turns.is_empty());
    }

    #[test]
    fn get_unknown_returns_none() {
        let store = ConversationStore::in_memory().unwrap();
        assert!(store.get_conversation("conv_nope", true, true).unwrap().is_none());
        assert!(store.conversation_status("conv_nope").unwrap().is_none());
    }

    #[test]
    fn tokens_validate_and_reject_garbage() {
        let (store, conversation) = store_with_conversation(ManagementMode::External);
        let token = format!("tok-{}-a", conversation.id);

        let identity = store.validate_token(&token).unwrap().unwrap();
        assert_eq!(identity.conversation_id, conversation.id);
        assert_eq!(identity.agent_id, "a");

        assert!(store.validate_token("not-a-token").unwrap().is_none());
    }

    #[test]
    fn expired_tokens_are_invisible_then_swept() {
        let store = ConversationStore::in_memory().unwrap();
        let conversation = sample_conversation(ManagementMode::Internal);
        let past = "2000-01-01T00:00:00+00:00".to_string();
        let tokens = vec![
            AgentTokenSpec {
                token: "tok-live".into(),
                agent_id: "a".into(),
                expires_at: None,
            },
            AgentTokenSpec {
                token: "tok-dead".into(),
                agent_id: "b".into(),
                expires_at: Some(past),
            },
        ];
        store.create_conversation(&conversation, &tokens).unwrap();

        assert!(store.validate_token("tok-live").unwrap().is_some());
        assert!(store.validate_token("tok-dead").unwrap().is_none());

        assert_eq!(store.cleanup_expired_tokens().unwrap(), 1);
        // Sweep is idempotent.
        assert_eq!(store.cleanup_expired_tokens().unwrap(), 0);
        assert!(store.validate_token("tok-live").unwrap().is_some());
    }

    #[test]
    fn turn_lifecycle_with_trace() {
        let (store, conversation) = store_with_conversation(ManagementMode::Internal);
        let turn_id = ids::turn_id();
        store
            .start_turn(&turn_id, &conversation.id, "a", None, &ids::now_rfc3339())
            .unwrap();

        let open = store.in_progress_turns(&conversation.id).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, turn_id);

        let entry = TraceEntry {
            id: ids::trace_id(),
            agent_id: "a".into(),
            timestamp: ids::now_rfc3339(),
            payload: TracePayload::Thought {
                content: "thinking".into(),
            },
        };
        store.add_trace_entry(&conversation.id, &turn_id, &entry).unwrap();

        let turn = store
            .complete_turn(&conversation.id, &turn_id, "hello there", true)
            .unwrap()
            .unwrap();
        assert_eq!(turn.content, "hello there");
        assert!(turn.is_final_turn);
        assert_eq!(turn.trace.len(), 1);
        assert_eq!(turn.trace[0].payload.type_name(), "thought");
        assert!(turn.completed_at.is_some());

        // Registry-side invariant: the durable record is closed.
        assert!(store.in_progress_turns(&conversation.id).unwrap().is_empty());
        let loaded = store
            .get_conversation(&conversation.id, true, true)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].trace.len(), 1);
    }

    #[test]
    fn complete_twice_returns_none() {
        let (store, conversation) = store_with_conversation(ManagementMode::Internal);
        let turn_id = ids::turn_id();
        store
            .start_turn(&turn_id, &conversation.id, "a", None, &ids::now_rfc3339())
            .unwrap();

        assert!(store
            .complete_turn(&conversation.id, &turn_id, "one", false)
            .unwrap()
            .is_some());
        assert!(store
            .complete_turn(&conversation.id, &turn_id, "two", false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn cancel_closes_the_turn() {
        let (store, conversation) = store_with_conversation(ManagementMode::Internal);
        let turn_id = ids::turn_id();
        store
            .start_turn(&turn_id, &conversation.id, "a", None, &ids::now_rfc3339())
            .unwrap();

        assert!(store.cancel_turn(&conversation.id, &turn_id).unwrap());
        // Cancelled turns cannot be completed.
        assert!(store
            .complete_turn(&conversation.id, &turn_id, "late", false)
            .unwrap()
            .is_none());
        // And cannot be cancelled again.
        assert!(!store.cancel_turn(&conversation.id, &turn_id).unwrap());
    }

    #[test]
    fn status_updates_persist() {
        let (store, conversation) = store_with_conversation(ManagementMode::Internal);
        assert!(store
            .update_conversation_status(&conversation.id, ConversationStatus::Active)
            .unwrap());
        assert_eq!(
            store.conversation_status(&conversation.id).unwrap(),
            Some(ConversationStatus::Active)
        );
        assert!(!store
            .update_conversation_status("conv_nope", ConversationStatus::Active)
            .unwrap());
    }

    #[test]
    fn query_lifecycle() {
        let (store, conversation) = store_with_conversation(ManagementMode::Internal);
        let query = UserQuery {
            id: ids::query_id(),
            conversation_id: conversation.id.clone(),
            agent_id: "a".into(),
            question: "continue?".into(),
            context: json!({"step": 1}),
            status: UserQueryStatus::Pending,
            response: None,
            created_at: ids::now_rfc3339(),
        };
        store.create_user_query(&query).unwrap();

        let pending = store.pending_queries(Some(&conversation.id)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.pending_queries(None).unwrap().len(), 1);

        assert!(store.answer_user_query(&query.id, "yes").unwrap());
        let answered = store.get_user_query(&query.id).unwrap().unwrap();
        assert_eq!(answered.status, UserQueryStatus::Answered);
        assert_eq!(answered.response.as_deref(), Some("yes"));
        assert_eq!(answered.context, json!({"step": 1}));

        // Answering again fails: no longer pending.
        assert!(!store.answer_user_query(&query.id, "again").unwrap());
        assert!(store.pending_queries(None).unwrap().is_empty());
    }

    #[test]
    fn scenarios_resolve_pinned_and_latest() {
        let store = ConversationStore::in_memory().unwrap();
        let v1 = ScenarioConfiguration {
            id: "scn_demo".into(),
            version_id: "v1".into(),
            name: "Demo".into(),
            config: json!({"steps": 1}),
        };
        let v2 = ScenarioConfiguration {
            id: "scn_demo".into(),
            version_id: "v2".into(),
            name: "Demo".into(),
            config: json!({"steps": 2}),
        };
        store.insert_scenario(&v1).unwrap();
        store.insert_scenario(&v2).unwrap();

        let pinned = store.find_scenario("scn_demo", Some("v1")).unwrap().unwrap();
        assert_eq!(pinned.config["steps"], 1);

        let latest = store.find_scenario("scn_demo", None).unwrap().unwrap();
        assert_eq!(latest.version_id, "v2");

        assert!(store.find_scenario("scn_missing", None).unwrap().is_none());
    }

    #[test]
    fn list_conversations_pages_newest_first() {
        let store = ConversationStore::in_memory().unwrap();
        for _ in 0..3 {
            let conversation = sample_conversation(ManagementMode::Internal);
            store.create_conversation(&conversation, &[]).unwrap();
        }

        let page = store
            .list_conversations(&ListConversationsOptions {
                limit: 2,
                offset: 0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.conversations.len(), 2);
        assert_eq!(page.total, 3);

        let rest = store
            .list_conversations(&ListConversationsOptions {
                limit: 2,
                offset: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rest.conversations.len(), 1);
    }

    #[test]
    fn survives_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colloquy.db");

        let conversation = sample_conversation(ManagementMode::External);
        let turn_id = ids::turn_id();
        {
            let store = ConversationStore::open(&path).unwrap();
            store
                .create_conversation(
                    &conversation,
                    &[AgentTokenSpec {
                        token: "tok-persist".into(),
                        agent_id: "a".into(),
                        expires_at: None,
                    }],
                )
                .unwrap();
            store
                .start_turn(&turn_id, &conversation.id, "a", None, &ids::now_rfc3339())
                .unwrap();
            let _ = store
                .complete_turn(&conversation.id, &turn_id, "persisted", false)
                .unwrap()
                .unwrap();
        }

        // In-memory caches are gone; durable state is authoritative.
        let reopened = ConversationStore::open(&path).unwrap();
        let loaded = reopened
            .get_conversation(&conversation.id, true, false)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].content, "persisted");
        assert!(reopened.validate_token("tok-persist").unwrap().is_some());
    }
}
