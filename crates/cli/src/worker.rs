//! One interactive session: registry, mounted protocol servers, turn loop,
//! persisted history and the observability sink, wired together.

use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use worker_mcp::{McpRuntime, McpServerConfig, MountReport};
use worker_tool_runtime::{
    register_builtin_tools, AgentRuntime, Conversation, ModelBackend, RemoteToolPolicy, SecurityConfig,
    SecurityPolicy, ToolContext, ToolRegistry,
};

use crate::observability::JsonlEventSink;
use crate::session::SessionStore;

/// Resolved knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub workspace: PathBuf,
    pub session_id: String,
    /// Load and persist history.
    pub memory: bool,
    pub system_prompt: String,
    pub max_iterations: usize,
    pub backend_timeout: Duration,
    pub tool_timeout: Duration,
    pub remote_policy: RemoteToolPolicy,
    pub security: SecurityConfig,
    pub mcp_servers: Vec<McpServerConfig>,
}

pub struct WorkerSession {
    runtime: AgentRuntime,
    conversation: Conversation,
    store: Option<SessionStore>,
    mcp: McpRuntime,
    sink: Arc<JsonlEventSink>,
    mount_report: MountReport,
    session_id: String,
}

impl WorkerSession {
    pub async fn start(backend: Arc<dyn ModelBackend>, settings: SessionSettings) -> Result<Self> {
        let policy = Arc::new(SecurityPolicy::new(&settings.workspace, settings.security.clone()));
        let context = ToolContext::new(Arc::clone(&policy));
        let workspace = policy.workspace_root().to_path_buf();

        let sink = Arc::new(JsonlEventSink::new(&workspace, &settings.session_id)?);

        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        let mut runtime = AgentRuntime::new(backend, registry, context)
            .with_max_iterations(settings.max_iterations)
            .with_backend_timeout(settings.backend_timeout)
            .with_tool_timeout(settings.tool_timeout)
            .with_remote_policy(settings.remote_policy)
            .with_event_sink(sink.clone());

        let mut mcp = McpRuntime::new(&workspace);
        let mount_report = mcp.mount_all(&settings.mcp_servers, runtime.registry_mut()).await;
        for (server, error) in &mount_report.failed {
            sink.record("mcp_mount_failed", json!({"server": server, "error": error}));
        }

        let store = settings
            .memory
            .then(|| SessionStore::new(&workspace, &settings.session_id));
        let history = match &store {
            Some(store) => store.load()?,
            None => Vec::new(),
        };
        let conversation = Conversation::resume(history, Some(settings.system_prompt.as_str()));

        info!(
            session = %settings.session_id,
            workspace = %workspace.display(),
            tools = runtime.registry().len(),
            resumed = conversation.len().saturating_sub(1),
            "Worker session ready"
        );

        Ok(Self {
            runtime,
            conversation,
            store,
            mcp,
            sink,
            mount_report,
            session_id: settings.session_id,
        })
    }

    /// Run one turn. History is persisted whether or not the turn succeeds,
    /// so tool work done before a failure is kept.
    pub async fn ask(&mut self, input: &str) -> Result<String> {
        let outcome = self.runtime.run_turn(&mut self.conversation, input).await;
        self.persist();

        match outcome {
            Ok(reply) => {
                self.sink.record("chat_reply", json!({"chars": reply.content.chars().count()}));
                Ok(reply.content)
            }
            Err(err) => {
                self.sink.record("chat_error", json!({"error": err.to_string()}));
                Err(err.into())
            }
        }
    }

    /// Send `message` `count` times, the first immediately and the rest on
    /// an `every` interval. A failed cycle is recorded and the loop moves on.
    /// `on_cycle` sees each 1-based cycle number and its outcome. Returns the
    /// number of cycles that produced a reply.
    pub async fn heartbeat(
        &mut self,
        message: &str,
        every: Duration,
        count: u32,
        mut on_cycle: impl FnMut(u32, &Result<String>),
    ) -> u32 {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut replied = 0;

        for cycle in 1..=count {
            ticker.tick().await;
            info!(session = %self.session_id, cycle, count, "Heartbeat cycle");
            let outcome = self.ask(message).await;
            match &outcome {
                Ok(reply) => {
                    replied += 1;
                    self.sink
                        .record("heartbeat_reply", json!({"cycle": cycle, "chars": reply.chars().count()}));
                }
                Err(err) => {
                    self.sink
                        .record("heartbeat_error", json!({"cycle": cycle, "error": format!("{err:#}")}));
                }
            }
            on_cycle(cycle, &outcome);
        }
        replied
    }

    /// Record an event outside a turn, such as a task or config change.
    pub fn record(&self, event: &str, fields: serde_json::Value) {
        self.sink.record(event, fields);
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(self.conversation.messages()) {
                warn!(error = %e, "Failed to save session");
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mount_report(&self) -> &MountReport {
        &self.mount_report
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.runtime.registry().names()
    }

    /// Stop protocol servers and unregister their tools.
    pub async fn close(mut self) {
        self.mcp.shutdown(self.runtime.registry_mut()).await;
        info!(session = %self.session_id, "Worker session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use worker_tool_runtime::provider::mock::MockBackend;
    use worker_tool_runtime::{BackendError, Message, Role, ToolCall};

    fn settings(dir: &std::path::Path, memory: bool) -> SessionSettings {
        SessionSettings {
            workspace: dir.to_path_buf(),
            session_id: "t".to_string(),
            memory,
            system_prompt: "be brief".to_string(),
            max_iterations: 5,
            backend_timeout: Duration::from_secs(5),
            tool_timeout: Duration::from_secs(5),
            remote_policy: RemoteToolPolicy::Trusted,
            security: SecurityConfig::default(),
            mcp_servers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_turn_with_tool_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_tool_calls(vec![ToolCall {
            id: "c1".to_string(),
            name: "write_file".to_string(),
            input: json!({"path": "out.txt", "content": "data"}),
        }]);
        backend.queue_text("wrote it");

        let mut session = WorkerSession::start(backend.clone(), settings(dir.path(), true)).await.unwrap();
        assert!(session.tool_names().contains(&"run_shell".to_string()));
        assert_eq!(session.ask("write a file").await.unwrap(), "wrote it");
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "data");

        let saved = SessionStore::new(dir.path(), "t").load().unwrap();
        assert_eq!(saved.len(), 5);
        assert_eq!(saved[0], Message::system("be brief"));
        assert_eq!(saved[3].role, Role::Tool);
        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_turn_still_persisted_and_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_error(BackendError::Network("down".to_string()));

        let mut session = WorkerSession::start(backend, settings(dir.path(), true)).await.unwrap();
        assert!(session.ask("hello").await.is_err());
        session.close().await;

        let mut resumed_settings = settings(dir.path(), true);
        resumed_settings.system_prompt = "new prompt".to_string();
        let backend = Arc::new(MockBackend::always(Message::assistant("back")));
        let mut resumed = WorkerSession::start(backend.clone(), resumed_settings).await.unwrap();
        assert_eq!(resumed.conversation().len(), 2);
        assert_eq!(resumed.conversation().system_prompt(), Some("new prompt"));

        resumed.ask("again").await.unwrap();
        let sent = &backend.requests()[0];
        assert_eq!(sent[1], Message::user("hello"));
        resumed.close().await;

        let counters = crate::observability::read_counters(
            &crate::observability::observability_dir(dir.path()).join("metrics.json"),
        );
        assert_eq!(counters.get("turn_failed"), Some(&1));
        assert_eq!(counters.get("chat_reply"), Some(&1));
    }

    #[tokio::test]
    async fn test_no_memory_writes_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::always(Message::assistant("ok")));
        let mut session = WorkerSession::start(backend, settings(dir.path(), false)).await.unwrap();
        session.ask("hi").await.unwrap();
        session.close().await;
        assert_eq!(crate::session::count_sessions(dir.path()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cycles_on_interval_and_survives_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockBackend::new());
        backend.queue_text("first");
        backend.queue_error(BackendError::Network("blip".to_string()));
        backend.queue_text("third");

        let mut session = WorkerSession::start(backend.clone(), settings(dir.path(), true)).await.unwrap();
        let started = tokio::time::Instant::now();
        let mut seen = Vec::new();
        let replied = session
            .heartbeat("ping", Duration::from_secs(60), 3, |cycle, outcome| {
                seen.push((cycle, outcome.as_ref().ok().cloned(), started.elapsed().as_secs()));
            })
            .await;

        assert_eq!(replied, 2);
        assert_eq!(
            seen,
            vec![
                (1, Some("first".to_string()), 0),
                (2, None, 60),
                (3, Some("third".to_string()), 120),
            ]
        );
        assert_eq!(crate::session::user_turns(session.conversation().messages()), 3);
        session.close().await;

        let counters = crate::observability::read_counters(
            &crate::observability::observability_dir(dir.path()).join("metrics.json"),
        );
        assert_eq!(counters.get("heartbeat_reply"), Some(&2));
        assert_eq!(counters.get("heartbeat_error"), Some(&1));
    }
}
