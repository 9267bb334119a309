//! Tool synthesis service boundary.
//!
//! Agents execute tools through a [`ToolSynthesis`] implementation. The
//! orchestrator never awaits synthesis on its event-delivery path; use
//! [`spawn_execute`] so a slow tool cannot stall event distribution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::errors::RuntimeError;

/// One tool invocation.
#[derive(Clone, Debug)]
pub struct ToolSynthesisInput {
    /// Tool name.
    pub tool_name: String,
    /// Invocation arguments.
    pub parameters: Value,
    /// Calling agent.
    pub agent_id: String,
    /// Owning conversation.
    pub conversation_id: String,
}

/// Result of a tool invocation.
#[derive(Clone, Debug)]
pub struct ToolSynthesisOutput {
    /// Tool output, recorded in the turn's trace as a `tool_result`.
    pub output: Value,
}

/// Executes tool calls on behalf of agents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolSynthesis: Send + Sync {
    /// Execute a single tool call.
    async fn execute(&self, input: ToolSynthesisInput)
    -> Result<ToolSynthesisOutput, RuntimeError>;
}

/// Run a tool call on its own task.
#[instrument(skip(service, input), fields(tool = %input.tool_name, agent_id = %input.agent_id))]
pub fn spawn_execute(
    service: Arc<dyn ToolSynthesis>,
    input: ToolSynthesisInput,
) -> JoinHandle<Result<ToolSynthesisOutput, RuntimeError>> {
    tokio::spawn(async move { service.execute(input).await })
}

/// Synthesis stub that echoes the parameters back. Test and demo use.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSynthesis;

#[async_trait]
impl ToolSynthesis for NoopSynthesis {
    async fn execute(
        &self,
        input: ToolSynthesisInput,
    ) -> Result<ToolSynthesisOutput, RuntimeError> {
        Ok(ToolSynthesisOutput {
            output: serde_json::json!({
                "tool": input.tool_name,
                "echo": input.parameters,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mocked_synthesis_failure_propagates() {
        let mut mock = MockToolSynthesis::new();
        let _ = mock
            .expect_execute()
            .returning(|_| Err(RuntimeError::Synthesis("tool backend down".into())));

        let service: Arc<dyn ToolSynthesis> = Arc::new(mock);
        let handle = spawn_execute(
            service,
            ToolSynthesisInput {
                tool_name: "lookup".into(),
                parameters: json!({}),
                agent_id: "agent-a".into(),
                conversation_id: "conv_1".into(),
            },
        );
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RuntimeError::Synthesis(_)));
    }

    #[tokio::test]
    async fn noop_synthesis_echoes_parameters() {
        let service: Arc<dyn ToolSynthesis> = Arc::new(NoopSynthesis);
        let handle = spawn_execute(
            service,
            ToolSynthesisInput {
                tool_name: "lookup".into(),
                parameters: json!({"key": "k"}),
                agent_id: "agent-a".into(),
                conversation_id: "conv_1".into(),
            },
        );
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output.output["tool"], "lookup");
        assert_eq!(output.output["echo"]["key"], "k");
    }
}
