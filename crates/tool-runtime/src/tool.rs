use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::security::{PolicyViolation, SecurityPolicy};

/// Describes a tool's interface for model consumption.
/// Serializes to the function-calling shape most chat backends accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name within one registry (e.g., "run_shell", "read_file")
    pub name: String,
    /// Human-readable description for the model
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// A model's request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier scoped to one assistant turn, echoed back in the result
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON input arguments
    #[serde(default)]
    pub input: Value,
}

/// Where a tool's handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    /// Handler runs in-process.
    Local,
    /// Handler delegates to an external protocol server.
    Remote { server: String },
}

impl ToolOrigin {
    pub fn is_remote(&self) -> bool {
        matches!(self, ToolOrigin::Remote { .. })
    }
}

/// Machine-readable failure category carried by failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidInput,
    BlockedCommand,
    PathEscape,
    BlockedHost,
    LimitExceeded,
    ExecutionFailed,
    Timeout,
    ProcessTerminated,
    RequestTimeout,
    ProtocolError,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::InvalidInput => "invalid_input",
            ToolErrorKind::BlockedCommand => "blocked_command",
            ToolErrorKind::PathEscape => "path_escape",
            ToolErrorKind::BlockedHost => "blocked_host",
            ToolErrorKind::LimitExceeded => "limit_exceeded",
            ToolErrorKind::ExecutionFailed => "execution_failed",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::ProcessTerminated => "process_terminated",
            ToolErrorKind::RequestTimeout => "request_timeout",
            ToolErrorKind::ProtocolError => "protocol_error",
        };
        f.write_str(name)
    }
}

/// Failure detail attached to an unsuccessful [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Result of executing a tool, sent back to the model.
///
/// Every [`ToolCall`] gets exactly one of these, failures included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    /// Whether this result represents an error
    pub is_error: bool,
    /// Output payload (text or structured); `Null` on failure
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            is_error: false,
            content,
            error: None,
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, error: &ToolError) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            is_error: true,
            content: Value::Null,
            error: Some(ToolFailure {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Text placed in the tool message the model reads.
    pub fn to_message_content(&self) -> String {
        let payload = match &self.error {
            Some(failure) => json!({
                "ok": false,
                "error": { "kind": failure.kind, "message": failure.message },
            }),
            None => json!({ "ok": !self.is_error, "content": self.content }),
        };
        payload.to_string()
    }
}

/// Context passed to tool execution, providing access to the security policy.
#[derive(Clone)]
pub struct ToolContext {
    /// Working directory for file/shell operations (the workspace root)
    pub working_directory: PathBuf,
    /// Session policy every built-in handler consults before an effect
    pub policy: Arc<SecurityPolicy>,
}

impl ToolContext {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self {
            working_directory: policy.workspace_root().to_path_buf(),
            policy,
        }
    }
}

/// The primary extension point: every handler in the registry implements this,
/// whether it runs in-process or forwards to a protocol server.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's spec (name, description, JSON Schema).
    fn spec(&self) -> ToolSpec;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Local
    }

    /// Execute the tool with the given JSON input and return its output payload.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Process terminated: {0}")]
    ProcessTerminated(String),
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            ToolError::UnknownTool(_) => ToolErrorKind::UnknownTool,
            ToolError::InvalidInput(_) => ToolErrorKind::InvalidInput,
            ToolError::Policy(violation) => violation.kind(),
            ToolError::ExecutionFailed(_) | ToolError::Other(_) => ToolErrorKind::ExecutionFailed,
            ToolError::Timeout(_) => ToolErrorKind::Timeout,
            ToolError::ProcessTerminated(_) => ToolErrorKind::ProcessTerminated,
            ToolError::RequestTimeout(_) => ToolErrorKind::RequestTimeout,
            ToolError::Protocol(_) => ToolErrorKind::ProtocolError,
        }
    }
}

impl fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing '{field}' field")))
}

type BoxedHandler = Arc<
    dyn Fn(Value, ToolContext) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A local tool backed by an async closure, for handlers registered at runtime
/// without a dedicated type.
pub struct FnTool {
    spec: ToolSpec,
    handler: BoxedHandler,
}

impl FnTool {
    pub fn new<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            spec,
            handler: Arc::new(move |input, ctx| Box::pin(handler(input, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        (self.handler)(input, context.clone()).await
    }
}

/// Echoes back its `text` argument. Useful for wiring checks.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "echo".to_string(),
            description: "Echoes back the input text.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to echo back"
                    }
                },
                "required": ["text"]
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<Value, ToolError> {
        let text = required_str(&input, "text")?;
        Ok(json!({ "text": text }))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::security::SecurityConfig;

    pub fn context_for(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(Arc::new(SecurityPolicy::new(dir, SecurityConfig::default())))
    }
}
