use crate::conversation::{Conversation, Message};
use crate::events::{EventSink, NullSink, RuntimeEvent};
use crate::provider::{BackendError, ModelBackend};
use crate::registry::{RemoteToolPolicy, ToolRegistry};
use crate::tool::{ToolCall, ToolContext, ToolError, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// The turn loop that orchestrates model ↔ tool execution.
///
/// Flow: User → Model → ToolCalls → Execute → Results → Model → ... → Final Text
///
/// One runtime per session. The runtime owns its registry; callers own the
/// conversation and must not run two turns against it at once.
pub struct AgentRuntime {
    backend: Arc<dyn ModelBackend>,
    registry: ToolRegistry,
    context: ToolContext,
    events: Arc<dyn EventSink>,
    max_iterations: usize,
    backend_timeout: Duration,
    tool_timeout: Duration,
}

impl AgentRuntime {
    pub fn new(backend: Arc<dyn ModelBackend>, registry: ToolRegistry, context: ToolContext) -> Self {
        Self {
            backend,
            registry,
            context,
            events: Arc::new(NullSink),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_remote_policy(mut self, policy: RemoteToolPolicy) -> Self {
        self.registry.set_remote_policy(policy);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Mount/unmount point. Not to be used while a turn is running.
    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run a single user turn. Returns the final assistant message, which
    /// is also the last message of `conversation`.
    ///
    /// Backend failures and the iteration ceiling end the turn with an
    /// error; tool failures are fed back to the model as tool messages.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        user_input: impl Into<String>,
    ) -> Result<Message, AgentError> {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let user_input = user_input.into();

        self.events.emit(&RuntimeEvent::TurnStarted {
            turn_id: turn_id.clone(),
            input_chars: user_input.chars().count(),
        });
        info!(turn_id = %turn_id, backend = self.backend.name(), "Turn started");
        conversation.push(Message::user(user_input));

        let outcome = self.drive(&turn_id, conversation).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok((_, iterations)) => {
                info!(turn_id = %turn_id, iterations, duration_ms, "Turn completed");
                self.events.emit(&RuntimeEvent::TurnCompleted {
                    turn_id,
                    iterations: *iterations,
                    duration_ms,
                });
            }
            Err(err) => {
                warn!(turn_id = %turn_id, error = %err, "Turn failed");
                self.events.emit(&RuntimeEvent::TurnFailed {
                    turn_id,
                    error: err.to_string(),
                    duration_ms,
                });
            }
        }

        outcome.map(|(message, _)| message)
    }

    async fn drive(
        &self,
        turn_id: &str,
        conversation: &mut Conversation,
    ) -> Result<(Message, usize), AgentError> {
        for iteration in 1..=self.max_iterations {
            debug!(iteration, "Awaiting model");
            let specs = self.registry.list_specs();
            let call_started = Instant::now();

            let reply = tokio::time::timeout(
                self.backend_timeout,
                self.backend.complete(conversation.messages(), &specs),
            )
            .await
            .map_err(|_| BackendError::Timeout(self.backend_timeout))??;

            self.events.emit(&RuntimeEvent::ModelResponded {
                turn_id: turn_id.to_string(),
                iteration,
                tool_calls: reply.tool_calls.len(),
                duration_ms: call_started.elapsed().as_millis() as u64,
            });

            if !reply.has_tool_calls() {
                let final_message = Message::assistant(reply.content);
                conversation.push(final_message.clone());
                return Ok((final_message, iteration));
            }

            let calls: Vec<ToolCall> = reply
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(idx, mut call)| {
                    if call.id.is_empty() {
                        call.id = format!("call_{iteration}_{idx}");
                    }
                    call
                })
                .collect();
            conversation.push(Message::assistant_with_tool_calls(reply.content, calls.clone()));

            info!(count = calls.len(), iteration, "Executing tool calls");
            // Sequential: later calls may depend on effects of earlier ones.
            for call in &calls {
                let result = self.execute_call(turn_id, call).await;
                conversation.push(Message::tool_result(&result));
            }
        }

        Err(AgentError::TurnLimitExceeded(self.max_iterations))
    }

    async fn execute_call(&self, turn_id: &str, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.tool_timeout,
            self.registry.invoke(call, &self.context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %call.name, timeout = ?self.tool_timeout, "Tool call timed out");
                ToolResult::failure(&call.id, &ToolError::Timeout(self.tool_timeout))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(tool = %call.name, ok = !result.is_error, duration_ms, "Tool finished");

        self.events.emit(&RuntimeEvent::ToolInvoked {
            turn_id: turn_id.to_string(),
            call_id: call.id.clone(),
            name: call.name.clone(),
            duration_ms,
            ok: !result.is_error,
            error_kind: result.error_kind(),
        });
        result
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Turn limit ({0} iterations) exceeded")]
    TurnLimitExceeded(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::events::MemorySink;
    use crate::provider::mock::MockBackend;
    use crate::tool::test_support::context_for;
    use crate::tool::{EchoTool, FnTool, ToolErrorKind, ToolSpec};
    use serde_json::{json, Value};

    fn echo_call(id: &str, text: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "echo".to_string(),
            input: json!({"text": text}),
        }
    }

    fn setup(backend: Arc<MockBackend>, dir: &std::path::Path) -> AgentRuntime {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        AgentRuntime::new(backend, registry, context_for(dir))
    }

    fn tool_payload(message: &Message) -> Value {
        serde_json::from_str(&message.content).unwrap()
    }

    #[tokio::test]
    async fn test_turn_without_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("hi");
        let runtime = setup(backend.clone(), dir.path());

        let mut conv = Conversation::new();
        let reply = runtime.run_turn(&mut conv, "hello").await.unwrap();

        assert_eq!(reply.content, "hi");
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0], Message::user("hello"));
        assert_eq!(conv.last(), Some(&reply));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_single_echo_call() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(vec![echo_call("call_a", "x")]);
        backend.queue_text("done");
        let runtime = setup(backend.clone(), dir.path());

        let mut conv = Conversation::new();
        let reply = runtime.run_turn(&mut conv, "echo x").await.unwrap();

        assert_eq!(reply.content, "done");
        assert_eq!(conv.len(), 4);
        let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

        let tool_msg = &conv.messages()[2];
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(tool_payload(tool_msg), json!({"ok": true, "content": {"text": "x"}}));
        // The second backend call saw the tool result.
        assert_eq!(backend.requests()[1].len(), 3);
    }

    #[tokio::test]
    async fn test_every_call_gets_one_result_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(vec![
            echo_call("c1", "one"),
            ToolCall {
                id: "c2".to_string(),
                name: "no_such_tool".to_string(),
                input: json!({}),
            },
            echo_call("c3", "three"),
        ]);
        backend.queue_text("ok");
        let runtime = setup(backend, dir.path());

        let mut conv = Conversation::new();
        runtime.run_turn(&mut conv, "go").await.unwrap();

        let tool_ids: Vec<&str> = conv
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["c1", "c2", "c3"]);
        let unknown = tool_payload(&conv.messages()[3]);
        assert_eq!(unknown["error"]["kind"], json!("unknown_tool"));
    }

    #[tokio::test]
    async fn test_turn_limit_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::always(Message::assistant_with_tool_calls(
            "",
            vec![echo_call("loop", "again")],
        )));
        let runtime = setup(backend.clone(), dir.path()).with_max_iterations(3);

        let mut conv = Conversation::new();
        let err = runtime.run_turn(&mut conv, "spin").await.unwrap_err();

        assert!(matches!(err, AgentError::TurnLimitExceeded(3)));
        assert_eq!(backend.call_count(), 3);
        assert_eq!(conv.len(), 1 + 3 * 2);
    }

    #[tokio::test]
    async fn test_backend_error_is_fatal_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_error(BackendError::Network("connection reset".to_string()));
        backend.queue_text("never reached");
        let runtime = setup(backend.clone(), dir.path());

        let mut conv = Conversation::new();
        let err = runtime.run_turn(&mut conv, "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(BackendError::Network(_))));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new().with_delay(Duration::from_secs(30)));
        let runtime = setup(backend, dir.path()).with_backend_timeout(Duration::from_secs(5));

        let mut conv = Conversation::new();
        let err = runtime.run_turn(&mut conv, "hello").await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(BackendError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tool_times_out_as_failure_result() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(vec![ToolCall {
            id: "slow_1".to_string(),
            name: "slow".to_string(),
            input: json!({}),
        }]);
        backend.queue_text("gave up");

        let mut registry = ToolRegistry::new();
        registry.register(FnTool::new(
            ToolSpec {
                name: "slow".to_string(),
                description: "sleeps".to_string(),
                input_schema: json!({"type": "object"}),
            },
            |_, _| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(Value::Null)
            },
        ));
        let runtime = AgentRuntime::new(backend, registry, context_for(dir.path()))
            .with_tool_timeout(Duration::from_secs(1));

        let mut conv = Conversation::new();
        let reply = runtime.run_turn(&mut conv, "wait").await.unwrap();
        assert_eq!(reply.content, "gave up");
        let payload = tool_payload(&conv.messages()[2]);
        assert_eq!(payload["error"]["kind"], json!(ToolErrorKind::Timeout.to_string()));
    }

    #[tokio::test]
    async fn test_missing_call_ids_are_synthesized() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(vec![echo_call("", "a"), echo_call("", "b")]);
        backend.queue_text("ok");
        let runtime = setup(backend, dir.path());

        let mut conv = Conversation::new();
        runtime.run_turn(&mut conv, "go").await.unwrap();
        let assistant = &conv.messages()[1];
        assert_eq!(assistant.tool_calls[0].id, "call_1_0");
        assert_eq!(assistant.tool_calls[1].id, "call_1_1");
        assert_eq!(conv.messages()[3].tool_call_id.as_deref(), Some("call_1_1"));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(vec![echo_call("c1", "x")]);
        backend.queue_text("done");
        let sink = Arc::new(MemorySink::new());
        let runtime = setup(backend, dir.path()).with_event_sink(sink.clone());

        let mut conv = Conversation::new();
        runtime.run_turn(&mut conv, "go").await.unwrap();

        assert_eq!(
            sink.names(),
            vec![
                "turn_started",
                "model_responded",
                "tool_invoked",
                "model_responded",
                "turn_completed"
            ]
        );
        match &sink.events()[2] {
            RuntimeEvent::ToolInvoked { name, ok, call_id, .. } => {
                assert_eq!(name, "echo");
                assert_eq!(call_id, "c1");
                assert!(*ok);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
