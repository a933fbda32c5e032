//! Session-level ownership of protocol clients.
//!
//! Mounting starts a client, discovers its tools and registers one
//! [`McpTool`] per capability. Shutdown stops every client and removes the
//! tools it contributed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use worker_tool_runtime::ToolRegistry;

use crate::client::{McpClient, McpTool};
use crate::config::McpServerConfig;
use crate::error::McpError;

struct Mounted {
    client: Arc<McpClient>,
    tool_names: Vec<String>,
}

/// Outcome of [`McpRuntime::mount_all`].
#[derive(Debug, Default)]
pub struct MountReport {
    /// `(server, tool count)` for each server that mounted.
    pub mounted: Vec<(String, usize)>,
    /// `(server, error message)` for each server that failed.
    pub failed: Vec<(String, String)>,
    /// Servers skipped because they are marked `disabled`.
    pub skipped: Vec<String>,
}

impl MountReport {
    pub fn tool_count(&self) -> usize {
        self.mounted.iter().map(|(_, n)| n).sum()
    }
}

/// Owns the configured protocol clients for one session.
pub struct McpRuntime {
    workspace: PathBuf,
    mounted: Vec<Mounted>,
}

impl McpRuntime {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            mounted: Vec::new(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Start the server described by `config` and register its tools.
    /// Returns the registry names of the mounted tools.
    pub async fn mount(&mut self, config: &McpServerConfig, registry: &mut ToolRegistry) -> Result<Vec<String>, McpError> {
        if self.mounted.iter().any(|m| m.client.name() == config.name) {
            return Err(McpError::Config(format!("server '{}' is already mounted", config.name)));
        }

        let client = Arc::new(McpClient::spawn(config, &self.workspace).await?);
        let specs = match client.list_capabilities().await {
            Ok(specs) => specs,
            Err(err) => {
                client.shutdown().await;
                return Err(err);
            }
        };

        let mut tool_names = Vec::with_capacity(specs.len());
        for spec in specs {
            let tool = McpTool::new(Arc::clone(&client), spec);
            let name = tool.mounted_name().to_string();
            if registry.register(tool).is_some() {
                warn!(server = %config.name, tool = %name, "Mounted tool replaced an existing registration");
            }
            tool_names.push(name);
        }

        info!(server = %config.name, tools = tool_names.len(), "Mounted MCP server");
        self.mounted.push(Mounted {
            client,
            tool_names: tool_names.clone(),
        });
        Ok(tool_names)
    }

    /// Mount every enabled server. One server's failure never prevents the
    /// others from mounting.
    pub async fn mount_all(&mut self, configs: &[McpServerConfig], registry: &mut ToolRegistry) -> MountReport {
        let mut report = MountReport::default();
        for config in configs {
            if config.disabled {
                info!(server = %config.name, "Skipping disabled MCP server");
                report.skipped.push(config.name.clone());
                continue;
            }
            match self.mount(config, registry).await {
                Ok(names) => report.mounted.push((config.name.clone(), names.len())),
                Err(err) => {
                    warn!(server = %config.name, error = %err, "Failed to mount MCP server");
                    report.failed.push((config.name.clone(), err.to_string()));
                }
            }
        }
        report
    }

    /// Names of currently mounted servers.
    pub fn servers(&self) -> Vec<&str> {
        self.mounted.iter().map(|m| m.client.name()).collect()
    }

    pub fn client(&self, server: &str) -> Option<Arc<McpClient>> {
        self.mounted
            .iter()
            .find(|m| m.client.name() == server)
            .map(|m| Arc::clone(&m.client))
    }

    /// Stop every client and unregister the tools they contributed.
    pub async fn shutdown(&mut self, registry: &mut ToolRegistry) {
        for mounted in self.mounted.drain(..) {
            for name in &mounted.tool_names {
                registry.unregister(name);
            }
            mounted.client.shutdown().await;
        }
    }
}
