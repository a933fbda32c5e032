//! Error types for the MCP crate.

use std::time::Duration;

use worker_tool_runtime::ToolError;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The requested tool was not found in the registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The peer answered with a JSON-RPC error object.
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Malformed or unexpected traffic from the peer.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server process could not be started.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The handshake failed or did not complete within the startup timeout.
    #[error("Server '{server}' failed to start: {reason}")]
    StartupFailed { server: String, reason: String },

    /// The server process exited, or the client was shut down, while a
    /// request was outstanding or before it was sent.
    #[error("Server process terminated: {0}")]
    ProcessTerminated(String),

    /// No response arrived within the per-request timeout.
    #[error("Request '{method}' timed out after {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },

    /// Operation requires a state the client is not in.
    #[error("Not initialized: call initialize first")]
    NotInitialized,

    /// Invalid server configuration file.
    #[error("Invalid MCP config: {0}")]
    Config(String),
}

impl McpError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::ToolNotFound(_) => error_codes::INVALID_PARAMS,
            McpError::Rpc { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<McpError> for ToolError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::ProcessTerminated(reason) => ToolError::ProcessTerminated(reason),
            McpError::RequestTimeout { timeout, .. } => ToolError::RequestTimeout(timeout),
            McpError::InvalidParams(msg) => ToolError::InvalidInput(msg),
            McpError::JsonParse(_)
            | McpError::Protocol(_)
            | McpError::Rpc { .. }
            | McpError::MethodNotFound(_) => ToolError::Protocol(err.to_string()),
            McpError::NotInitialized
            | McpError::StartupFailed { .. }
            | McpError::Spawn { .. }
            | McpError::Transport(_) => ToolError::ProcessTerminated(err.to_string()),
            other => ToolError::ExecutionFailed(other.to_string()),
        }
    }
}
