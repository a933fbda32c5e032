//! MCP client implementation.
//!
//! Manages one server process: spawns it, performs the handshake, and
//! correlates responses to requests through a [`PendingTable`] fed by a
//! dedicated reader task. Requests never read the stream themselves, so a
//! stray or late response cannot be mistaken for another request's reply.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use worker_tool_runtime::security::truncate_chars;
use worker_tool_runtime::tool::{Tool, ToolContext, ToolError, ToolOrigin, ToolSpec};

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::pending::PendingTable;
use crate::types::*;

/// Lifecycle of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Process running, handshake not yet answered.
    Starting,
    /// `initialize` answered.
    Initialized,
    /// Handshake confirmed; serving capability calls.
    Ready,
    /// Shut down or the process exited. Terminal.
    Stopped,
}

/// Pages of `tools/list` followed before giving up on a cursor chain.
const MAX_LIST_PAGES: usize = 32;

/// An MCP client connected to one server.
pub struct McpClient {
    name: String,
    startup_timeout: Duration,
    request_timeout: Duration,
    write_tx: mpsc::Sender<String>,
    pending: PendingTable,
    state: Arc<watch::Sender<ClientState>>,
    server_info: StdMutex<Option<ServerInfo>>,
    child: Mutex<Option<Child>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl McpClient {
    /// Spawn the configured server process and complete the handshake.
    ///
    /// The process runs in the configured cwd (default: `workspace`) with
    /// stdin/stdout piped for JSON-RPC and stderr drained into the log.
    pub async fn spawn(config: &McpServerConfig, workspace: &Path) -> Result<Self, McpError> {
        let cwd = config.resolve_cwd(workspace);
        info!(server = %config.name, command = %config.command, cwd = %cwd.display(), "Spawning MCP server process");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("failed to capture server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("failed to capture server stdout".to_string()))?;
        let stderr = child.stderr.take();

        let client = Self::connect(stdout, stdin, config);
        if let Some(stderr) = stderr {
            client.track(tokio::spawn(drain_stderr(config.name.clone(), stderr)));
        }
        *client.child.lock().await = Some(child);

        if let Err(err) = client.initialize().await {
            client.shutdown().await;
            return Err(err);
        }
        Ok(client)
    }

    /// Attach to an already-running peer through a reader/writer pair.
    /// The client starts in [`ClientState::Starting`]; call
    /// [`initialize`](Self::initialize) next.
    pub fn connect<R, W>(reader: R, writer: W, config: &McpServerConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = PendingTable::new();
        let (state_tx, _) = watch::channel(ClientState::Starting);
        let state = Arc::new(state_tx);
        let (write_tx, write_rx) = mpsc::channel::<String>(64);

        let writer_task = tokio::spawn(write_loop(
            config.name.clone(),
            writer,
            write_rx,
            pending.clone(),
            Arc::clone(&state),
        ));
        let reader_task = tokio::spawn(read_loop(
            config.name.clone(),
            reader,
            write_tx.clone(),
            pending.clone(),
            Arc::clone(&state),
        ));

        Self {
            name: config.name.clone(),
            startup_timeout: config.startup_timeout,
            request_timeout: config.request_timeout,
            write_tx,
            pending,
            state,
            server_info: StdMutex::new(None),
            child: Mutex::new(None),
            tasks: StdMutex::new(vec![writer_task, reader_task]),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().ok().and_then(|info| info.clone())
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Perform the handshake: `initialize` within the startup timeout,
    /// then the `notifications/initialized` confirmation.
    pub async fn initialize(&self) -> Result<(), McpError> {
        if self.state() != ClientState::Starting {
            return Err(McpError::Protocol(format!(
                "initialize called in state {:?}",
                self.state()
            )));
        }
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mini-worker",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = match self.request("initialize", Some(params), self.startup_timeout).await {
            Ok(result) => result,
            Err(err) => {
                self.mark_stopped(&format!("handshake failed: {err}"));
                return Err(McpError::StartupFailed {
                    server: self.name.clone(),
                    reason: err.to_string(),
                });
            }
        };

        let init: InitializeResult = match serde_json::from_value(result) {
            Ok(init) => init,
            Err(err) => {
                warn!(server = %self.name, error = %err, "Malformed initialize result");
                self.mark_stopped("malformed initialize result");
                return Err(McpError::StartupFailed {
                    server: self.name.clone(),
                    reason: format!("malformed initialize result: {err}"),
                });
            }
        };
        if let Ok(mut info) = self.server_info.lock() {
            *info = init.server_info.clone();
        }
        self.transition(ClientState::Starting, ClientState::Initialized);

        self.notify("notifications/initialized", Some(json!({}))).await?;
        self.transition(ClientState::Initialized, ClientState::Ready);

        info!(
            server = %self.name,
            protocol = %init.protocol_version,
            remote = ?init.server_info.map(|s| s.name),
            "MCP client initialized"
        );
        Ok(())
    }

    /// Enumerate the tools the server exposes, following pagination.
    pub async fn list_capabilities(&self) -> Result<Vec<ToolSpec>, McpError> {
        self.ensure_ready()?;
        let mut specs = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = serde_json::to_value(ListToolsParams { cursor: cursor.take() })?;
            let result = self.request("tools/list", Some(params), self.request_timeout).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {e}")))?;
            specs.extend(
                page.tools
                    .into_iter()
                    .filter(|t| !t.name.trim().is_empty())
                    .map(ToolInfo::into_spec),
            );
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.name, count = specs.len(), "Tool discovery complete");
        Ok(specs)
    }

    /// Execute a named tool on the server.
    pub async fn invoke_capability(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.ensure_ready()?;
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params), self.request_timeout).await?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol(format!("invalid tools/call result: {e}")))
    }

    /// Stop the client: fail outstanding requests, stop the background
    /// tasks and terminate the process. Idempotent.
    pub async fn shutdown(&self) {
        self.mark_stopped("client shut down");

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
                warn!(server = %self.name, "MCP server did not exit after kill");
            }
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        info!(server = %self.name, "MCP client stopped");
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        match self.state() {
            ClientState::Ready => Ok(()),
            ClientState::Stopped => Err(McpError::ProcessTerminated(format!(
                "server '{}' is stopped",
                self.name
            ))),
            ClientState::Starting | ClientState::Initialized => Err(McpError::NotInitialized),
        }
    }

    fn transition(&self, from: ClientState, to: ClientState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }

    fn mark_stopped(&self, reason: &str) {
        self.state.send_replace(ClientState::Stopped);
        self.pending.fail_all(reason);
    }

    /// Send a request and wait for the reply routed back by the reader task.
    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value, McpError> {
        let pending = self.pending.register(method)?;
        let request = JsonRpcRequest::new(RpcId::Number(pending.id()), method, params);
        let line = serde_json::to_string(&request)?;

        debug!(server = %self.name, method, id = pending.id(), "Sending request");
        self.write_tx
            .send(line)
            .await
            .map_err(|_| McpError::ProcessTerminated(format!("server '{}' writer closed", self.name)))?;

        pending.wait(timeout).await
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_tx
            .send(line)
            .await
            .map_err(|_| McpError::ProcessTerminated(format!("server '{}' writer closed", self.name)))
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.pending.fail_all("client dropped");
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn write_loop<W>(
    server: String,
    mut writer: W,
    mut rx: mpsc::Receiver<String>,
    pending: PendingTable,
    state: Arc<watch::Sender<ClientState>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(server = %server, error = %e, "MCP stdio write failed");
            state.send_replace(ClientState::Stopped);
            pending.fail_all(&format!("write to server '{server}' failed: {e}"));
            break;
        }
    }
}

async fn read_loop<R>(
    server: String,
    reader: R,
    write_tx: mpsc::Sender<String>,
    pending: PendingTable,
    state: Arc<watch::Sender<ClientState>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&server, line.trim(), &write_tx, &pending),
            Ok(None) => break format!("server '{server}' closed its output"),
            Err(e) => break format!("read from server '{server}' failed: {e}"),
        }
    };

    state.send_replace(ClientState::Stopped);
    let failed = pending.fail_all(&reason);
    warn!(server = %server, failed, "{reason}");
}

fn dispatch_line(server: &str, line: &str, write_tx: &mpsc::Sender<String>, pending: &PendingTable) {
    if line.is_empty() {
        return;
    }
    let message = serde_json::from_str::<Value>(line).and_then(IncomingMessage::classify);
    match message {
        Ok(IncomingMessage::Response(response)) => {
            let RpcId::Number(id) = response.id else {
                warn!(server, id = ?response.id, "Discarding response with non-numeric id");
                return;
            };
            let reply = match (response.error, response.result) {
                (Some(err), _) => Err(McpError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                (None, Some(result)) => Ok(result),
                (None, None) => Ok(Value::Null),
            };
            if !pending.complete(id, reply) {
                warn!(server, id, "Discarding response with no pending request");
            }
        }
        Ok(IncomingMessage::Request(request)) => {
            debug!(server, method = %request.method, "Server request not supported");
            let err = McpError::MethodNotFound(request.method.clone());
            let reply = JsonRpcResponse::error(request.id, err.to_rpc_error().code, err.to_string());
            if let Ok(line) = serde_json::to_string(&reply) {
                let _ = write_tx.try_send(line);
            }
        }
        Ok(IncomingMessage::Notification(notification)) => {
            debug!(server, method = %notification.method, "Server notification");
        }
        Err(e) => {
            warn!(server, error = %e, "Discarding unparseable line from server");
        }
    }
}

async fn drain_stderr<R>(server: String, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %server, "stderr: {line}");
    }
}

/// Registry name for a remote tool: `mcp__<server>__<tool>`, with
/// characters outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn mounted_tool_name(server: &str, tool: &str) -> String {
    fn clean(part: &str) -> String {
        part.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect()
    }
    format!("mcp__{}__{}", clean(server), clean(tool))
}

/// A remote tool adapter that implements the `Tool` trait by delegating
/// to [`McpClient::invoke_capability`].
pub struct McpTool {
    client: Arc<McpClient>,
    remote_name: String,
    spec: ToolSpec,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, remote: ToolSpec) -> Self {
        let spec = ToolSpec {
            name: mounted_tool_name(client.name(), &remote.name),
            description: remote.description,
            input_schema: remote.input_schema,
        };
        Self {
            client,
            remote_name: remote.name,
            spec,
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Name the tool is registered under.
    pub fn mounted_name(&self) -> &str {
        &self.spec.name
    }
}

#[async_trait]
impl Tool for McpTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Remote {
            server: self.client.name().to_string(),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let result = self.client.invoke_capability(&self.remote_name, input).await?;
        let max_chars = context.policy.config().max_output_chars;
        if result.is_error {
            return Err(ToolError::ExecutionFailed(truncate_chars(
                &result.normalized_text(),
                max_chars,
            )));
        }
        Ok(result.into_bounded_output(max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type ServerLines = tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>;

    /// Scripted peer on the other end of a duplex pipe.
    struct FakeServer {
        lines: ServerLines,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn next(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn answer_handshake(&mut self) {
            let init = self.next().await;
            assert_eq!(init["method"], json!("initialize"));
            self.send(json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {"protocolVersion": PROTOCOL_VERSION, "capabilities": {}, "serverInfo": {"name": "fake"}}
            }))
            .await;
            let confirmed = self.next().await;
            assert_eq!(confirmed["method"], json!("notifications/initialized"));
        }
    }

    fn pair(config: &McpServerConfig) -> (McpClient, FakeServer) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let client = McpClient::connect(client_read, client_write, config);
        let server = FakeServer {
            lines: BufReader::new(server_read).lines(),
            writer: server_write,
        };
        (client, server)
    }

    fn config() -> McpServerConfig {
        McpServerConfig::new("fake", "unused")
            .with_startup_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_handshake_state_transitions() {
        let (client, mut server) = pair(&config());
        assert_eq!(client.state(), ClientState::Starting);

        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.server_info().unwrap().name, "fake");
    }

    #[tokio::test]
    async fn test_calls_before_initialize_rejected() {
        let (client, _server) = pair(&config());
        let err = client.invoke_capability("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized));
    }

    #[tokio::test]
    async fn test_list_and_call() {
        let (client, mut server) = pair(&config());
        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();

        let serve = async {
            let list = server.next().await;
            assert_eq!(list["method"], json!("tools/list"));
            server
                .send(json!({"jsonrpc": "2.0", "id": list["id"], "result": {"tools": [
                    {"name": "lookup", "description": "Look up", "inputSchema": {"type": "object"}}
                ]}}))
                .await;
            let call = server.next().await;
            assert_eq!(call["params"]["name"], json!("lookup"));
            assert_eq!(call["params"]["arguments"], json!({"key": "k"}));
            server
                .send(json!({"jsonrpc": "2.0", "id": call["id"], "result": {
                    "content": [{"type": "text", "text": "value"}]
                }}))
                .await;
        };
        let run = async {
            let specs = client.list_capabilities().await.unwrap();
            assert_eq!(specs[0].name, "lookup");
            client.invoke_capability("lookup", json!({"key": "k"})).await.unwrap()
        };
        let (_, result) = tokio::join!(serve, run);
        assert_eq!(result.normalized_text(), "value");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_correlated() {
        let (client, mut server) = pair(&config());
        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();

        let serve = async {
            let first = server.next().await;
            let second = server.next().await;
            // Unknown id first: must be discarded, not delivered.
            server.send(json!({"jsonrpc": "2.0", "id": 9999, "result": {"content": []}})).await;
            for req in [&second, &first] {
                let name = req["params"]["name"].as_str().unwrap().to_string();
                server
                    .send(json!({"jsonrpc": "2.0", "id": req["id"], "result": {
                        "content": [{"type": "text", "text": name}]
                    }}))
                    .await;
            }
        };
        let calls = async {
            tokio::join!(
                client.invoke_capability("a", json!({})),
                client.invoke_capability("b", json!({}))
            )
        };
        let (_, (a, b)) = tokio::join!(serve, calls);
        assert_eq!(a.unwrap().normalized_text(), "a");
        assert_eq!(b.unwrap().normalized_text(), "b");
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn test_rpc_error_response() {
        let (client, mut server) = pair(&config());
        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();

        let serve = async {
            let call = server.next().await;
            server
                .send(json!({"jsonrpc": "2.0", "id": call["id"], "error": {"code": -32602, "message": "bad args"}}))
                .await;
        };
        let (_, result) = tokio::join!(serve, client.invoke_capability("x", json!({})));
        assert!(matches!(result, Err(McpError::Rpc { code: -32602, .. })));
    }

    #[tokio::test]
    async fn test_request_timeout_releases_slot() {
        let config = config().with_request_timeout(Duration::from_millis(100));
        let (client, mut server) = pair(&config);
        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();

        let err = client.invoke_capability("silent", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::RequestTimeout { .. }));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.state(), ClientState::Ready);

        // A late reply for the abandoned id is discarded.
        let call = server.next().await;
        server.send(json!({"jsonrpc": "2.0", "id": call["id"], "result": {}})).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_exit_fails_outstanding_and_stops() {
        let (client, mut server) = pair(&config());
        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();

        let crash = async {
            let _call = server.next().await;
            drop(server);
        };
        let (_, result) = tokio::join!(crash, client.invoke_capability("x", json!({})));
        assert!(matches!(result, Err(McpError::ProcessTerminated(_))));

        let mut state = client.subscribe_state();
        state.wait_for(|s| *s == ClientState::Stopped).await.unwrap();

        // Subsequent calls fail fast.
        let started = std::time::Instant::now();
        let err = client.invoke_capability("x", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ProcessTerminated(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let config = config().with_startup_timeout(Duration::from_millis(100));
        let (client, _server) = pair(&config);
        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::StartupFailed { .. }));
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_abandoned_call_releases_slot() {
        let config = config().with_request_timeout(Duration::from_secs(30));
        let (client, mut server) = pair(&config);
        let (init, _) = tokio::join!(client.initialize(), server.answer_handshake());
        init.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            client.invoke_capability("slow", json!({})),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_count(), 0);

        // A late reply to the abandoned id is dropped and the client keeps serving.
        let stale = server.next().await;
        server
            .send(json!({"jsonrpc": "2.0", "id": stale["id"], "result": {"content": []}}))
            .await;
        let serve = async {
            let call = server.next().await;
            server
                .send(json!({"jsonrpc": "2.0", "id": call["id"], "result": {
                    "content": [{"type": "text", "text": "fresh"}]
                }}))
                .await;
        };
        let (result, _) = tokio::join!(client.invoke_capability("fast", json!({})), serve);
        assert_eq!(result.unwrap().normalized_text(), "fresh");
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_initialize_result_fails_startup() {
        let (client, mut server) = pair(&config());
        let serve = async {
            let init = server.next().await;
            server
                .send(json!({"jsonrpc": "2.0", "id": init["id"], "result": "garbage"}))
                .await;
        };
        let (init, _) = tokio::join!(client.initialize(), serve);

        let err = init.unwrap_err();
        assert!(matches!(err, McpError::StartupFailed { .. }));
        assert!(err.to_string().contains("malformed initialize result"));
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(client.server_info().is_none());
        assert!(matches!(
            client.invoke_capability("echo", json!({})).await,
            Err(McpError::ProcessTerminated(_))
        ));
    }

    #[tokio::test]
    async fn test_server_requests_get_method_not_found() {
        let (client, mut server) = pair(&config());
        server
            .send(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "sampling/createMessage"}))
            .await;
        let reply = server.next().await;
        assert_eq!(reply["id"], json!("srv-1"));
        assert_eq!(reply["error"]["code"], json!(error_codes::METHOD_NOT_FOUND));
        drop(client);
    }

    #[test]
    fn test_mounted_tool_name() {
        assert_eq!(mounted_tool_name("files", "read_file"), "mcp__files__read_file");
        assert_eq!(mounted_tool_name("my server", "a.b/c"), "mcp__my_server__a_b_c");
    }
}
