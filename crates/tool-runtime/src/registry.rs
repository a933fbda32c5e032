use crate::tool::{Tool, ToolCall, ToolContext, ToolError, ToolResult, ToolSpec};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether arguments to remote-origin tools pass through the security gate
/// before dispatch. Built-in handlers always consult the policy themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemoteToolPolicy {
    /// The protocol server is its own trust boundary.
    #[default]
    Trusted,
    /// Screen path, command and url arguments like a built-in would.
    Gated,
}

/// Name → handler map. One instance per session; the only seam through
/// which built-in, custom and protocol-mounted tools are exposed.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    remote_policy: RemoteToolPolicy,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            remote_policy: RemoteToolPolicy::default(),
        }
    }

    pub fn with_remote_policy(mut self, policy: RemoteToolPolicy) -> Self {
        self.remote_policy = policy;
        self
    }

    pub fn set_remote_policy(&mut self, policy: RemoteToolPolicy) {
        self.remote_policy = policy;
    }

    pub fn remote_policy(&self) -> RemoteToolPolicy {
        self.remote_policy
    }

    /// Register a tool. Last registration for a name wins; the replaced
    /// handler is returned.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Option<Arc<dyn Tool>> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.spec().name;
        let previous = self.tools.insert(name.clone(), tool);
        if previous.is_some() {
            debug!(tool = %name, "Replaced registered tool");
        }
        previous
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Specs of every registered tool, sorted by name so the backend sees
    /// a stable ordering.
    pub fn list_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one call. Never fails: unknown names, policy rejections,
    /// handler errors and handler panics all become failure results.
    pub async fn invoke(&self, call: &ToolCall, context: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return ToolResult::failure(&call.id, &ToolError::UnknownTool(call.name.clone()));
        };

        if tool.origin().is_remote() && self.remote_policy == RemoteToolPolicy::Gated {
            if let Err(violation) = context.policy.screen_arguments(&call.input) {
                warn!(tool = %call.name, %violation, "Remote tool call rejected by policy");
                return ToolResult::failure(&call.id, &ToolError::Policy(violation));
            }
        }

        let outcome = AssertUnwindSafe(tool.execute(call.input.clone(), context))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(content)) => ToolResult::success(&call.id, content),
            Ok(Err(err)) => {
                debug!(tool = %call.name, error = %err, "Tool returned error");
                ToolResult::failure(&call.id, &err)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                warn!(tool = %call.name, message, "Tool handler panicked");
                ToolResult::failure(&call.id, &ToolError::ExecutionFailed(message))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
