//! Caller-owned bounded wait for a user-query answer.
//!
//! The orchestrator never times a query out. An agent that wants a
//! bounded wait creates a [`QueryWaiter`] before asking and awaits it
//! with its own timeout; abandoning the wait leaves the query pending
//! in the store, where it can still be answered or listed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use colloquy_core::events::ConversationEvent;
use colloquy_core::query::UserQueryStatus;

use crate::orchestrator::orchestrator::ConversationOrchestrator;
use crate::orchestrator::subscriptions::{EventFilter, Scope, SubscriptionHandle};

/// Default bound agents put on a query wait.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a wait ended without a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueryWaitError {
    /// The bound elapsed. The query remains pending.
    #[error("timed out waiting for a response")]
    TimedOut,
    /// The wait was cancelled through its token.
    #[error("wait cancelled")]
    Cancelled,
    /// The answer channel closed without a response.
    #[error("answer channel closed")]
    Closed,
}

/// A one-shot wait for one query's answer.
pub struct QueryWaiter {
    rx: oneshot::Receiver<String>,
    cancel: CancellationToken,
    _subscription: SubscriptionHandle,
}

impl QueryWaiter {
    /// Start watching for an answer to `query_id`.
    ///
    /// Subscribes before checking the store, so an answer landing at any
    /// point is observed: either through the event stream or through the
    /// already-answered record.
    #[must_use]
    pub fn new(
        orchestrator: &ConversationOrchestrator,
        conversation_id: &str,
        query_id: &str,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let wanted = query_id.to_string();
        let tx_for_events = Arc::clone(&tx);
        let subscription = orchestrator.subscribe(
            Scope::Conversation(conversation_id.to_string()),
            EventFilter::default().with_events(["user_query_answered"]),
            Arc::new(move |event| {
                if let ConversationEvent::UserQueryAnswered {
                    query_id, response, ..
                } = event
                {
                    if *query_id == wanted {
                        if let Some(tx) = tx_for_events.lock().take() {
                            let _ = tx.send(response.clone());
                        }
                    }
                }
            }),
        );

        if let Ok(view) = orchestrator.user_query_status(query_id) {
            if view.status == UserQueryStatus::Answered {
                if let (Some(response), Some(tx)) = (view.response, tx.lock().take()) {
                    let _ = tx.send(response);
                }
            }
        }

        Self {
            rx,
            cancel: CancellationToken::new(),
            _subscription: subscription,
        }
    }

    /// Token that aborts the wait when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Await the response for at most `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<String, QueryWaitError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(QueryWaitError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.rx) => match outcome {
                Err(_) => Err(QueryWaitError::TimedOut),
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(QueryWaitError::Closed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentDeps, AgentFactory, AgentInstance, OrchestratorHandle};
    use crate::errors::RuntimeError;
    use crate::synthesis::NoopSynthesis;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use colloquy_core::conversation::{
        AgentConfig, AgentId, AgentStrategy, CreateConversationRequest, ManagementMode,
    };
    use colloquy_store::ConversationStore;
    use serde_json::json;

    struct NoAgents;

    #[async_trait]
    impl AgentFactory for NoAgents {
        async fn create(
            &self,
            config: &AgentConfig,
            _client: OrchestratorHandle,
            _deps: AgentDeps,
        ) -> Result<Arc<dyn AgentInstance>, RuntimeError> {
            Err(RuntimeError::Provisioning {
                agent_id: config.agent_id.id.clone(),
                reason: "not provisioned in this test".into(),
            })
        }
    }

    fn orchestrator_with_query() -> (Arc<ConversationOrchestrator>, String, String) {
        let store = Arc::new(ConversationStore::in_memory().unwrap());
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            store,
            Arc::new(NoAgents),
            Arc::new(NoopSynthesis),
        ));
        let response = orchestrator
            .create_conversation(CreateConversationRequest {
                name: "query wait".into(),
                management_mode: ManagementMode::External,
                agents: vec![AgentConfig {
                    agent_id: AgentId {
                        id: "a".into(),
                        label: "A".into(),
                        role: "asker".into(),
                    },
                    strategy: AgentStrategy::ExternalProxy {
                        external_id: "ext-1".into(),
                    },
                    opening_message: None,
                }],
                initiating_agent_id: None,
            })
            .unwrap();
        let conversation_id = response.conversation.id.clone();
        let query = orchestrator
            .create_user_query(&conversation_id, "a", "proceed?", json!({}))
            .unwrap();
        (orchestrator, conversation_id, query.id)
    }

    #[tokio::test]
    async fn resolves_when_the_answer_arrives() {
        let (orchestrator, conversation_id, query_id) = orchestrator_with_query();
        let waiter = QueryWaiter::new(&orchestrator, &conversation_id, &query_id);

        orchestrator.respond_to_user_query(&query_id, "yes").unwrap();

        let response = waiter.wait(DEFAULT_QUERY_TIMEOUT).await.unwrap();
        assert_eq!(response, "yes");
    }

    #[tokio::test]
    async fn resolves_for_an_already_answered_query() {
        let (orchestrator, conversation_id, query_id) = orchestrator_with_query();
        orchestrator.respond_to_user_query(&query_id, "done").unwrap();

        // Created after the answer landed: the store record resolves it.
        let waiter = QueryWaiter::new(&orchestrator, &conversation_id, &query_id);
        let response = waiter.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(response, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_leaves_the_query_pending() {
        let (orchestrator, conversation_id, query_id) = orchestrator_with_query();
        let waiter = QueryWaiter::new(&orchestrator, &conversation_id, &query_id);

        let err = waiter.wait(Duration::from_secs(5)).await.unwrap_err();
        assert_matches!(err, QueryWaitError::TimedOut);

        // The orchestrator never expires the query on the agent's behalf.
        assert_eq!(
            orchestrator.user_query_status(&query_id).unwrap().status,
            UserQueryStatus::Pending
        );
        orchestrator.respond_to_user_query(&query_id, "late").unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let (orchestrator, conversation_id, query_id) = orchestrator_with_query();
        let waiter = QueryWaiter::new(&orchestrator, &conversation_id, &query_id);

        let token = waiter.cancellation_token();
        token.cancel();

        let err = waiter.wait(DEFAULT_QUERY_TIMEOUT).await.unwrap_err();
        assert_matches!(err, QueryWaitError::Cancelled);
    }
}
