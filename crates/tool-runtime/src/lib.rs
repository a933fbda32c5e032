pub mod conversation;
pub mod events;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod security;
pub mod tool;
pub mod tools;

pub use conversation::{Conversation, Message, Role};
pub use events::{EventSink, MemorySink, NullSink, RuntimeEvent};
pub use provider::{BackendError, ModelBackend};
pub use registry::{RemoteToolPolicy, ToolRegistry};
pub use runtime::{AgentError, AgentRuntime};
pub use security::{PolicyViolation, SecurityConfig, SecurityPolicy};
pub use tool::{
    EchoTool, FnTool, Tool, ToolCall, ToolContext, ToolError, ToolErrorKind, ToolFailure,
    ToolOrigin, ToolResult, ToolSpec,
};
pub use tools::register_builtin_tools;
