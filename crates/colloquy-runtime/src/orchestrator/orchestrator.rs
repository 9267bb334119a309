//! The conversation orchestrator.
//!
//! Single in-process authority over conversation and turn lifecycles.
//! Every mutation follows the same discipline: validate against current
//! state, persist through the store, update derived caches, then emit.
//! Events fire only after the durable write succeeded, so a subscriber
//! never observes an event for state that does not exist.
//!
//! The durable store is the source of truth. The active-conversation map
//! and the turn registry are derived caches: the former is rebuilt from
//! the store on demand, the latter is the fast path for "is this turn
//! open", backed by the durable in-progress rows after a restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use metrics::gauge;
use parking_lot::Mutex;
use rand::RngCore as _;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use colloquy_core::conversation::{
    Conversation, ConversationMetadata, ConversationStatus, CreateConversationRequest,
    CreateConversationResponse, ManagementMode,
};
use colloquy_core::conversation::{AgentConfig, AgentStrategy};
use colloquy_core::events::{BaseEvent, ConversationEvent, UserQueryNotice};
use colloquy_core::ids;
use colloquy_core::query::{UserQuery, UserQueryStatus, UserQueryStatusView};
use colloquy_core::turn::{TraceEntry, TracePayload, Turn, TurnShell, TurnStatus};
use colloquy_store::{
    AgentTokenSpec, ConversationPage, ConversationStore, ListConversationsOptions, TokenIdentity,
};

use crate::agent::{AgentDeps, AgentFactory, AgentInstance};
use crate::errors::RuntimeError;
use crate::orchestrator::subscriptions::{
    EventCallback, EventFilter, Scope, SubscriptionHandle, Subscriptions,
};
use crate::orchestrator::turn_registry::{InProgressTurn, TurnRegistry};
use crate::synthesis::ToolSynthesis;

/// Request to open a turn.
#[derive(Clone, Debug)]
pub struct StartTurnRequest {
    /// Owning conversation.
    pub conversation_id: String,
    /// Speaking agent.
    pub agent_id: String,
    /// Caller-supplied metadata carried on the turn.
    pub metadata: Option<Value>,
}

/// Request to attach a trace entry to an open turn.
#[derive(Clone, Debug)]
pub struct AddTraceEntryRequest {
    /// Owning conversation.
    pub conversation_id: String,
    /// Owning turn.
    pub turn_id: String,
    /// Agent producing the entry.
    pub agent_id: String,
    /// Entry payload.
    pub payload: TracePayload,
}

/// Request to finalize a turn.
#[derive(Clone, Debug)]
pub struct CompleteTurnRequest {
    /// Owning conversation.
    pub conversation_id: String,
    /// Turn to finalize.
    pub turn_id: String,
    /// Final content.
    pub content: String,
    /// Whether the agent declares this its final turn.
    pub is_final_turn: bool,
}

/// A conversation read projection: the durable record plus the shells of
/// any turns still open.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    /// The conversation as stored.
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Open turns, in start order. Empty unless requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub in_progress_turns: Vec<TurnShell>,
}

struct ConversationState {
    conversation: Conversation,
    agent_tokens: HashMap<String, String>,
    agents: HashMap<String, Arc<dyn AgentInstance>>,
    _subscriptions: Vec<SubscriptionHandle>,
}

/// Coordinates conversations, turns, agents, and event distribution.
pub struct ConversationOrchestrator {
    store: Arc<ConversationStore>,
    factory: Arc<dyn AgentFactory>,
    synthesis: Arc<dyn ToolSynthesis>,
    subscriptions: Subscriptions,
    turns: Mutex<TurnRegistry>,
    active: Mutex<HashMap<String, ConversationState>>,
    token_ttl: Option<chrono::Duration>,
}

impl ConversationOrchestrator {
    /// Create an orchestrator over a store, an agent factory, and a tool
    /// synthesis service.
    #[must_use]
    pub fn new(
        store: Arc<ConversationStore>,
        factory: Arc<dyn AgentFactory>,
        synthesis: Arc<dyn ToolSynthesis>,
    ) -> Self {
        Self {
            store,
            factory,
            synthesis,
            subscriptions: Subscriptions::default(),
            turns: Mutex::new(TurnRegistry::default()),
            active: Mutex::new(HashMap::new()),
            token_ttl: None,
        }
    }

    /// Give newly minted agent tokens a finite lifetime. Tokens never
    /// expire by default.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }

    /// The durable store backing this orchestrator.
    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────
    // Conversation lifecycle
    // ─────────────────────────────────────────────────────────────────

    /// Create a conversation in status `created` and mint one opaque
    /// auth token per declared agent.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<CreateConversationResponse, RuntimeError> {
        if request.agents.is_empty() {
            return Err(RuntimeError::Validation(
                "at least one agent is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for config in &request.agents {
            if !seen.insert(config.agent_id.id.as_str()) {
                return Err(RuntimeError::Validation(format!(
                    "duplicate agent id: {}",
                    config.agent_id.id
                )));
            }
        }
        if let Some(initiating) = &request.initiating_agent_id {
            if !seen.contains(initiating.as_str()) {
                return Err(RuntimeError::Validation(format!(
                    "initiating agent {initiating} is not among the declared agents"
                )));
            }
        }

        let conversation = Conversation {
            id: ids::conversation_id(),
            name: request.name,
            created_at: ids::now_rfc3339(),
            agents: request.agents.iter().map(|c| c.agent_id.clone()).collect(),
            turns: Vec::new(),
            status: ConversationStatus::Created,
            metadata: ConversationMetadata {
                agent_configs: request.agents,
                management_mode: request.management_mode,
                initiating_agent_id: request.initiating_agent_id,
            },
        };

        let expires_at = self
            .token_ttl
            .map(|ttl| (chrono::Utc::now() + ttl).to_rfc3339());
        let specs: Vec<AgentTokenSpec> = conversation
            .agents
            .iter()
            .map(|agent| AgentTokenSpec {
                token: Self::mint_token(),
                agent_id: agent.id.clone(),
                expires_at: expires_at.clone(),
            })
            .collect();

        self.store.create_conversation(&conversation, &specs)?;

        let agent_tokens: HashMap<String, String> = specs
            .into_iter()
            .map(|spec| (spec.agent_id, spec.token))
            .collect();

        {
            let mut active = self.active.lock();
            let _ = active.insert(
                conversation.id.clone(),
                ConversationState {
                    conversation: conversation.clone(),
                    agent_tokens: agent_tokens.clone(),
                    agents: HashMap::new(),
                    _subscriptions: Vec::new(),
                },
            );
            gauge!("colloquy_conversations_active").set(active.len() as f64);
        }

        self.emit(ConversationEvent::ConversationCreated {
            base: BaseEvent::now(&conversation.id),
            conversation: conversation.summary(),
        });
        info!(
            conversation_id = %conversation.id,
            agents = conversation.agents.len(),
            mode = conversation.metadata.management_mode.as_str(),
            "conversation created"
        );

        Ok(CreateConversationResponse {
            conversation,
            agent_tokens,
        })
    }

    /// Activate an internally managed conversation: provision its
    /// agents, announce readiness, and ask the initiating agent to open.
    ///
    /// Provisioning is best-effort per agent: a failing agent is skipped
    /// with a warning and the conversation proceeds with the rest.
    #[instrument(skip(self))]
    pub async fn start_conversation(
        self: &Arc<Self>,
        conversation_id: &str,
    ) -> Result<(), RuntimeError> {
        let conversation = self
            .store
            .get_conversation(conversation_id, false, false)?
            .ok_or_else(|| RuntimeError::ConversationNotFound(conversation_id.into()))?;

        if conversation.metadata.management_mode != ManagementMode::Internal {
            return Err(RuntimeError::IllegalState(
                "only internally managed conversations can be started".into(),
            ));
        }
        if conversation.status != ConversationStatus::Created {
            return Err(RuntimeError::IllegalState(format!(
                "conversation {conversation_id} is {}, expected created",
                conversation.status.as_str()
            )));
        }

        if !self
            .store
            .update_conversation_status(conversation_id, ConversationStatus::Active)?
        {
            return Err(RuntimeError::ConversationNotFound(conversation_id.into()));
        }

        let tokens = self.activate_cached(conversation_id, &conversation)?;

        let configs = conversation.metadata.agent_configs.clone();
        let mut provisioned: Vec<(String, Arc<dyn AgentInstance>, SubscriptionHandle)> =
            Vec::new();
        for config in &configs {
            match self.provision_agent(conversation_id, config, &tokens).await {
                Ok((agent, subscription)) => {
                    provisioned.push((config.agent_id.id.clone(), agent, subscription));
                }
                Err(err) => warn!(
                    conversation_id,
                    agent_id = %config.agent_id.id,
                    error = %err,
                    "agent provisioning failed, continuing without it"
                ),
            }
        }
        let provisioned_count = provisioned.len();

        {
            let mut active = self.active.lock();
            if let Some(state) = active.get_mut(conversation_id) {
                for (agent_id, agent, subscription) in provisioned {
                    let _ = state.agents.insert(agent_id, agent);
                    state._subscriptions.push(subscription);
                }
            }
        }

        self.emit(ConversationEvent::ConversationReady {
            base: BaseEvent::now(conversation_id),
        });

        // Failure to open is the initiating agent's problem, not the
        // conversation's.
        let initiating_agent = conversation
            .metadata
            .initiating_agent_id
            .as_ref()
            .and_then(|agent_id| {
                self.active
                    .lock()
                    .get(conversation_id)
                    .and_then(|state| state.agents.get(agent_id))
                    .map(Arc::clone)
            });
        if let Some(agent) = initiating_agent {
            if let Err(err) = agent.initialize_conversation().await {
                warn!(
                    conversation_id,
                    agent_id = %agent.identity().id,
                    error = %err,
                    "initiating agent failed to open the conversation"
                );
            }
        }

        info!(
            conversation_id,
            provisioned = provisioned_count,
            declared = configs.len(),
            "conversation started"
        );
        Ok(())
    }

    /// Move the conversation to its terminal `completed` status and
    /// release its agents.
    #[instrument(skip(self))]
    pub fn end_conversation(&self, conversation_id: &str) -> Result<(), RuntimeError> {
        let status = self
            .store
            .conversation_status(conversation_id)?
            .ok_or_else(|| RuntimeError::ConversationNotFound(conversation_id.into()))?;
        if status == ConversationStatus::Completed {
            return Err(RuntimeError::IllegalState(format!(
                "conversation {conversation_id} is already completed"
            )));
        }

        let _ = self
            .store
            .update_conversation_status(conversation_id, ConversationStatus::Completed)?;

        // Emit while the agents are still subscribed, then evict; the
        // eviction drops their subscriptions.
        self.emit(ConversationEvent::ConversationEnded {
            base: BaseEvent::now(conversation_id),
        });

        {
            let mut active = self.active.lock();
            let _ = active.remove(conversation_id);
            gauge!("colloquy_conversations_active").set(active.len() as f64);
        }
        info!(conversation_id, "conversation ended");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Turn protocol
    // ─────────────────────────────────────────────────────────────────

    /// Open a turn. Returns the open turn as carried by `turn_started`.
    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id, agent_id = %request.agent_id))]
    pub fn start_turn(&self, request: StartTurnRequest) -> Result<Turn, RuntimeError> {
        let status = self
            .store
            .conversation_status(&request.conversation_id)?
            .ok_or_else(|| RuntimeError::ConversationNotFound(request.conversation_id.clone()))?;
        if status == ConversationStatus::Completed {
            return Err(RuntimeError::IllegalState(format!(
                "conversation {} is completed",
                request.conversation_id
            )));
        }

        let turn_id = ids::turn_id();
        let started_at = ids::now_rfc3339();
        self.store.start_turn(
            &turn_id,
            &request.conversation_id,
            &request.agent_id,
            request.metadata.as_ref(),
            &started_at,
        )?;

        {
            let mut turns = self.turns.lock();
            turns.register(InProgressTurn {
                turn_id: turn_id.clone(),
                conversation_id: request.conversation_id.clone(),
                agent_id: request.agent_id.clone(),
                started_at: started_at.clone(),
                metadata: request.metadata.clone(),
            });
            gauge!("colloquy_turns_in_progress").set(turns.len() as f64);
        }

        let turn = Turn {
            id: turn_id,
            conversation_id: request.conversation_id.clone(),
            agent_id: request.agent_id,
            timestamp: started_at.clone(),
            content: String::new(),
            metadata: request.metadata,
            status: TurnStatus::InProgress,
            started_at,
            completed_at: None,
            trace: Vec::new(),
            is_final_turn: false,
        };
        self.emit(ConversationEvent::TurnStarted {
            base: BaseEvent::now(&request.conversation_id),
            turn: turn.clone(),
        });
        Ok(turn)
    }

    /// Attach a trace entry to a turn and broadcast it.
    ///
    /// The turn shell carried on `trace_added` comes from the registry
    /// while the turn is open, otherwise from the durable record, so a
    /// tool result landing after completion is still recorded.
    #[instrument(skip(self, request), fields(turn_id = %request.turn_id, entry_type = request.payload.type_name()))]
    pub fn add_trace_entry(
        &self,
        request: AddTraceEntryRequest,
    ) -> Result<TraceEntry, RuntimeError> {
        let shell = self.resolve_turn_shell(&request.conversation_id, &request.turn_id)?;

        let entry = TraceEntry {
            id: ids::trace_id(),
            agent_id: request.agent_id.clone(),
            timestamp: ids::now_rfc3339(),
            payload: request.payload,
        };
        self.store
            .add_trace_entry(&request.conversation_id, &request.turn_id, &entry)?;

        match &entry.payload {
            TracePayload::Thought { content } => self.emit(ConversationEvent::AgentThinking {
                base: BaseEvent::now(&request.conversation_id),
                agent_id: request.agent_id.clone(),
                thought: content.clone(),
            }),
            TracePayload::ToolCall {
                tool_name,
                parameters,
                ..
            } => self.emit(ConversationEvent::ToolExecuting {
                base: BaseEvent::now(&request.conversation_id),
                agent_id: request.agent_id.clone(),
                tool_name: tool_name.clone(),
                parameters: parameters.clone(),
            }),
            TracePayload::ToolResult { .. } => {}
        }

        self.emit(ConversationEvent::TraceAdded {
            base: BaseEvent::now(&request.conversation_id),
            turn: shell,
            trace: entry.clone(),
        });
        Ok(entry)
    }

    /// Finalize a turn with its content. The sole "agent finished
    /// speaking" signal; emits `turn_completed` with the full trace.
    ///
    /// Also the implicit activation point: the first completed turn of
    /// an externally managed conversation promotes it `created → active`.
    #[instrument(skip(self, request), fields(conversation_id = %request.conversation_id, turn_id = %request.turn_id))]
    pub fn complete_turn(&self, request: CompleteTurnRequest) -> Result<Turn, RuntimeError> {
        let open = self.resolve_open_turn(&request.turn_id)?;
        if open.conversation_id != request.conversation_id {
            return Err(RuntimeError::TurnNotFound(request.turn_id.clone()));
        }

        let turn = self
            .store
            .complete_turn(
                &request.conversation_id,
                &request.turn_id,
                &request.content,
                request.is_final_turn,
            )?
            .ok_or_else(|| RuntimeError::TurnNotFound(request.turn_id.clone()))?;

        self.promote_if_first_external_turn(&request.conversation_id)?;

        {
            let mut active = self.active.lock();
            if let Some(state) = active.get_mut(&request.conversation_id) {
                state.conversation.turns.push(turn.clone());
            }
        }

        // Removal from the registry is the close point: from here the
        // turn no longer accepts ownership operations.
        {
            let mut turns = self.turns.lock();
            let _ = turns.remove(&request.turn_id);
            gauge!("colloquy_turns_in_progress").set(turns.len() as f64);
        }

        self.emit(ConversationEvent::TurnCompleted {
            base: BaseEvent::now(&request.conversation_id),
            turn: turn.clone(),
        });
        Ok(turn)
    }

    /// Abandon an open turn. Advisory: the owning agent must observe the
    /// `turn_cancelled` event itself.
    #[instrument(skip(self))]
    pub fn cancel_turn(&self, turn_id: &str) -> Result<(), RuntimeError> {
        let open = self.resolve_open_turn(turn_id)?;

        if !self.store.cancel_turn(&open.conversation_id, turn_id)? {
            warn!(turn_id, "open turn had no in-progress durable record");
        }

        {
            let mut turns = self.turns.lock();
            let _ = turns.remove(turn_id);
            gauge!("colloquy_turns_in_progress").set(turns.len() as f64);
        }

        self.emit(ConversationEvent::TurnCancelled {
            base: BaseEvent::now(&open.conversation_id),
            turn_id: turn_id.into(),
            agent_id: open.agent_id,
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // User queries
    // ─────────────────────────────────────────────────────────────────

    /// Persist a pending user query and broadcast it. The orchestrator
    /// never times queries out; any bounded wait belongs to the asker.
    #[instrument(skip(self, question, context))]
    pub fn create_user_query(
        &self,
        conversation_id: &str,
        agent_id: &str,
        question: &str,
        context: Value,
    ) -> Result<UserQuery, RuntimeError> {
        let _ = self
            .store
            .conversation_status(conversation_id)?
            .ok_or_else(|| RuntimeError::ConversationNotFound(conversation_id.into()))?;

        let query = UserQuery {
            id: ids::query_id(),
            conversation_id: conversation_id.into(),
            agent_id: agent_id.into(),
            question: question.into(),
            context,
            status: UserQueryStatus::Pending,
            response: None,
            created_at: ids::now_rfc3339(),
        };
        self.store.create_user_query(&query)?;

        self.emit(ConversationEvent::UserQueryCreated {
            base: BaseEvent::now(conversation_id),
            query: UserQueryNotice {
                query_id: query.id.clone(),
                agent_id: query.agent_id.clone(),
                question: query.question.clone(),
                context: query.context.clone(),
                created_at: query.created_at.clone(),
            },
        });
        Ok(query)
    }

    /// Record a response to a pending query and broadcast it with the
    /// context the asker supplied.
    #[instrument(skip(self, response))]
    pub fn respond_to_user_query(
        &self,
        query_id: &str,
        response: &str,
    ) -> Result<(), RuntimeError> {
        let query = self
            .store
            .get_user_query(query_id)?
            .ok_or_else(|| RuntimeError::QueryNotFound(query_id.into()))?;

        if !self.store.answer_user_query(query_id, response)? {
            return Err(RuntimeError::IllegalState(format!(
                "query {query_id} is not pending"
            )));
        }

        self.emit(ConversationEvent::UserQueryAnswered {
            base: BaseEvent::now(&query.conversation_id),
            query_id: query_id.into(),
            response: response.into(),
            context: query.context,
        });
        Ok(())
    }

    /// Status projection for a query.
    pub fn user_query_status(&self, query_id: &str) -> Result<UserQueryStatusView, RuntimeError> {
        let query = self
            .store
            .get_user_query(query_id)?
            .ok_or_else(|| RuntimeError::QueryNotFound(query_id.into()))?;
        Ok(UserQueryStatusView {
            query_id: query.id,
            status: query.status,
            response: query.response,
        })
    }

    /// Pending queries for one conversation, or all when `None`.
    pub fn pending_user_queries(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<Vec<UserQuery>, RuntimeError> {
        Ok(self.store.pending_queries(conversation_id)?)
    }

    // ─────────────────────────────────────────────────────────────────
    // Reads, tokens, subscriptions
    // ─────────────────────────────────────────────────────────────────

    /// Load a conversation view.
    pub fn get_conversation(
        &self,
        conversation_id: &str,
        include_turns: bool,
        include_trace: bool,
        include_in_progress: bool,
    ) -> Result<Option<ConversationView>, RuntimeError> {
        let Some(conversation) =
            self.store
                .get_conversation(conversation_id, include_turns, include_trace)?
        else {
            return Ok(None);
        };
        let in_progress_turns = if include_in_progress {
            self.store.in_progress_turns(conversation_id)?
        } else {
            Vec::new()
        };
        Ok(Some(ConversationView {
            conversation,
            in_progress_turns,
        }))
    }

    /// List conversations, newest first.
    pub fn list_conversations(
        &self,
        opts: &ListConversationsOptions,
    ) -> Result<ConversationPage, RuntimeError> {
        Ok(self.store.list_conversations(opts)?)
    }

    /// Resolve an opaque agent token. Unknown or expired tokens resolve
    /// to `None`, indistinguishably.
    pub fn validate_agent_token(&self, token: &str) -> Result<Option<TokenIdentity>, RuntimeError> {
        Ok(self.store.validate_token(token)?)
    }

    /// Sweep expired tokens from the store.
    pub fn cleanup_expired_tokens(&self) -> Result<u64, RuntimeError> {
        Ok(self.store.cleanup_expired_tokens()?)
    }

    /// Register an event subscription. The handle unsubscribes on drop.
    pub fn subscribe(
        &self,
        scope: Scope,
        filter: EventFilter,
        callback: EventCallback,
    ) -> SubscriptionHandle {
        self.subscriptions.subscribe(scope, filter, callback)
    }

    /// Drop every subscription, open-turn record, and cached
    /// conversation. Durable state is untouched.
    pub fn close(&self) {
        self.subscriptions.clear();
        {
            let mut turns = self.turns.lock();
            turns.clear();
            gauge!("colloquy_turns_in_progress").set(0.0);
        }
        {
            let mut active = self.active.lock();
            active.clear();
            gauge!("colloquy_conversations_active").set(0.0);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────

    fn emit(&self, event: ConversationEvent) {
        debug!(
            event_type = event.event_type(),
            conversation_id = event.conversation_id(),
            "emit"
        );
        self.subscriptions.deliver(&event);
    }

    /// 256-bit CSPRNG token, URL-safe base64 without padding.
    fn mint_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Mark the cached conversation active, rebuilding the cache entry
    /// from the store if this process did not create it.
    fn activate_cached(
        &self,
        conversation_id: &str,
        conversation: &Conversation,
    ) -> Result<HashMap<String, String>, RuntimeError> {
        let cached = {
            let mut active = self.active.lock();
            active.get_mut(conversation_id).map(|state| {
                state.conversation.status = ConversationStatus::Active;
                state.agent_tokens.clone()
            })
        };
        if let Some(tokens) = cached {
            return Ok(tokens);
        }

        let tokens = self.store.tokens_for_conversation(conversation_id)?;
        let mut conversation = conversation.clone();
        conversation.status = ConversationStatus::Active;
        let mut active = self.active.lock();
        let _ = active.insert(
            conversation_id.to_string(),
            ConversationState {
                conversation,
                agent_tokens: tokens.clone(),
                agents: HashMap::new(),
                _subscriptions: Vec::new(),
            },
        );
        gauge!("colloquy_conversations_active").set(active.len() as f64);
        Ok(tokens)
    }

    async fn provision_agent(
        self: &Arc<Self>,
        conversation_id: &str,
        config: &AgentConfig,
        tokens: &HashMap<String, String>,
    ) -> Result<(Arc<dyn AgentInstance>, SubscriptionHandle), RuntimeError> {
        let agent_id = &config.agent_id.id;
        let provisioning = |reason: String| RuntimeError::Provisioning {
            agent_id: agent_id.clone(),
            reason,
        };

        let scenario = match &config.strategy {
            AgentStrategy::ScenarioDriven {
                scenario_id,
                scenario_version_id,
            } => Some(
                self.store
                    .find_scenario(scenario_id, scenario_version_id.as_deref())
                    .map_err(|err| provisioning(err.to_string()))?
                    .ok_or_else(|| provisioning(format!("scenario {scenario_id} not found")))?,
            ),
            AgentStrategy::StaticReplay { .. } | AgentStrategy::ExternalProxy { .. } => None,
        };

        let token = tokens
            .get(agent_id)
            .ok_or_else(|| provisioning("no auth token minted".into()))?;

        let deps = AgentDeps {
            store: Arc::clone(&self.store),
            synthesis: Arc::clone(&self.synthesis),
            scenario,
        };
        let agent = self.factory.create(config, Arc::clone(self), deps).await?;
        agent.initialize(conversation_id, token).await?;

        // Subscribe only after the agent is initialized; events are
        // forwarded through a channel so each agent observes them in
        // emission order without blocking delivery.
        let (tx, mut rx) = mpsc::unbounded_channel::<ConversationEvent>();
        let subscription = self.subscriptions.subscribe(
            Scope::Conversation(conversation_id.to_string()),
            EventFilter::default(),
            Arc::new(move |event| {
                let _ = tx.send(event.clone());
            }),
        );
        let forward_to = Arc::clone(&agent);
        let _forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                forward_to.on_conversation_event(&event).await;
            }
        });

        debug!(conversation_id, agent_id, "agent provisioned");
        Ok((agent, subscription))
    }

    /// An open turn record: from the registry while this process owns
    /// it, otherwise rebuilt from the durable in-progress row, so a
    /// turn opened before a restart can still be completed or
    /// cancelled.
    fn resolve_open_turn(&self, turn_id: &str) -> Result<InProgressTurn, RuntimeError> {
        if let Some(open) = self.turns.lock().get(turn_id).cloned() {
            return Ok(open);
        }
        let turn = self
            .store
            .get_turn(turn_id)?
            .filter(|turn| turn.status == TurnStatus::InProgress)
            .ok_or_else(|| RuntimeError::TurnNotFound(turn_id.into()))?;
        Ok(InProgressTurn {
            turn_id: turn.id,
            conversation_id: turn.conversation_id,
            agent_id: turn.agent_id,
            started_at: turn.started_at,
            metadata: turn.metadata,
        })
    }

    /// Shell of a turn: from the registry while open, otherwise from
    /// the durable record.
    fn resolve_turn_shell(
        &self,
        conversation_id: &str,
        turn_id: &str,
    ) -> Result<TurnShell, RuntimeError> {
        let registered = self.turns.lock().get(turn_id).map(InProgressTurn::shell);
        let shell = match registered {
            Some(shell) => shell,
            None => self
                .store
                .get_turn(turn_id)?
                .map(|turn| turn.shell())
                .ok_or_else(|| RuntimeError::TurnNotFound(turn_id.into()))?,
        };
        if shell.conversation_id != conversation_id {
            return Err(RuntimeError::TurnNotFound(turn_id.into()));
        }
        Ok(shell)
    }

    fn promote_if_first_external_turn(&self, conversation_id: &str) -> Result<(), RuntimeError> {
        if self.store.conversation_status(conversation_id)? != Some(ConversationStatus::Created) {
            return Ok(());
        }

        let mode = {
            let active = self.active.lock();
            active
                .get(conversation_id)
                .map(|state| state.conversation.metadata.management_mode)
        };
        let mode = match mode {
            Some(mode) => mode,
            None => self
                .store
                .get_conversation(conversation_id, false, false)?
                .ok_or_else(|| RuntimeError::ConversationNotFound(conversation_id.into()))?
                .metadata
                .management_mode,
        };
        if mode != ManagementMode::External {
            return Ok(());
        }

        let _ = self
            .store
            .update_conversation_status(conversation_id, ConversationStatus::Active)?;
        {
            let mut active = self.active.lock();
            if let Some(state) = active.get_mut(conversation_id) {
                state.conversation.status = ConversationStatus::Active;
            }
        }
        info!(conversation_id, "external conversation activated by its first completed turn");
        Ok(())
    }
}
