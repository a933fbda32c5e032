//! MCP server implementation.
//!
//! Wraps a `ToolRegistry` and exposes its tools over the MCP protocol.
//! Handles JSON-RPC requests and dispatches them to the appropriate handlers.

use serde_json::{json, Value};

use worker_tool_runtime::{ToolCall, ToolContext, ToolRegistry, ToolResult};

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

/// MCP server that bridges a `ToolRegistry` to MCP clients.
pub struct McpServer {
    registry: ToolRegistry,
    context: ToolContext,
    server_name: String,
    server_version: String,
    initialized: bool,
    calls: u64,
}

impl McpServer {
    /// Create a server over `registry`; tools run with `context`'s policy.
    pub fn new(registry: ToolRegistry, context: ToolContext) -> Self {
        Self {
            registry,
            context,
            server_name: "worker-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: false,
            calls: 0,
        }
    }

    /// Set the server name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the server loop, reading from and writing to the transport.
    ///
    /// Processes JSON-RPC requests until the transport is closed.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, tools = self.registry.len(), "MCP server starting");

        while let Some(line) = transport.receive().await? {
            tracing::debug!(message = %line, "Received message");

            let message = serde_json::from_str::<Value>(&line).and_then(IncomingMessage::classify);
            let request = match message {
                Ok(IncomingMessage::Request(request)) => request,
                Ok(IncomingMessage::Notification(notif)) => {
                    self.handle_notification(&notif);
                    continue;
                }
                Ok(IncomingMessage::Response(resp)) => {
                    tracing::debug!(id = ?resp.id, "Ignoring response; server issues no requests");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON-RPC message");
                    let err = McpError::JsonParse(e).to_rpc_error();
                    let resp = JsonRpcResponse::error(RpcId::Number(0), err.code, err.message);
                    transport.send(&serde_json::to_string(&resp)?).await?;
                    continue;
                }
            };

            let response = self.handle_request(&request).await;
            let json = serde_json::to_string(&response)?;
            tracing::debug!(response = %json, "Sending response");
            transport.send(&json).await?;
        }

        tracing::info!(server = %self.server_name, calls = self.calls, "Transport closed, shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(&request.params).await,
            method => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                let rpc = err.to_rpc_error();
                JsonRpcResponse::error(id, rpc.code, rpc.message)
            }
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("Client confirmed initialization");
            }
            "notifications/cancelled" => {
                tracing::debug!("Client cancelled a request");
            }
            method => {
                tracing::debug!(method = %method, "Unknown notification, ignoring");
            }
        }
    }

    fn handle_initialize(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        let client = params
            .as_ref()
            .and_then(|p| serde_json::from_value::<InitializeParams>(p.clone()).ok())
            .map(|p| p.client_info.name);
        tracing::info!(client = ?client, "Handling initialize");
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: Some(ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            }),
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self) -> Result<Value, McpError> {
        tracing::debug!("Handling tools/list");

        let tools: Vec<ToolInfo> = self.registry.list_specs().into_iter().map(ToolInfo::from).collect();
        Ok(serde_json::to_value(ListToolsResult {
            tools,
            next_cursor: None,
        })?)
    }

    async fn handle_call_tool(&mut self, params: &Option<Value>) -> Result<Value, McpError> {
        let params = params
            .clone()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let call_params: CallToolParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

        if !self.registry.contains(&call_params.name) {
            return Err(McpError::ToolNotFound(call_params.name));
        }
        self.calls += 1;
        tracing::debug!(tool = %call_params.name, "Handling tools/call");

        let call = ToolCall {
            id: format!("mcp_{}", self.calls),
            name: call_params.name,
            input: if call_params.arguments.is_null() {
                json!({})
            } else {
                call_params.arguments
            },
        };
        let result = self.registry.invoke(&call, &self.context).await;
        Ok(serde_json::to_value(call_result(result))?)
    }
}

/// Tool failures are reported in-band (`isError`), not as JSON-RPC errors.
fn call_result(result: ToolResult) -> CallToolResult {
    if let Some(failure) = result.error {
        return CallToolResult::text(format!("{}: {}", failure.kind, failure.message), true);
    }
    match result.content {
        Value::String(text) => CallToolResult::text(text, false),
        structured => {
            let mut out = CallToolResult::text(structured.to_string(), false);
            out.structured_content = Some(structured);
            out
        }
    }
}
