//! Protocol server configuration.
//!
//! Servers are listed in a JSON file:
//!
//! ```json
//! {"servers": [{"name": "files", "command": "worker-mcp-server", "args": ["--workspace", "."]}]}
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::McpError;

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One protocol server. Read-only after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Working directory; relative paths resolve against the workspace.
    pub cwd: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
    pub disabled: bool,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            disabled: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Directory the server process runs in.
    pub fn resolve_cwd(&self, workspace: &Path) -> PathBuf {
        match &self.cwd {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        }
    }
}

#[derive(Deserialize)]
struct RawConfigFile {
    #[serde(default)]
    servers: Value,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawServer {
    name: Option<Value>,
    command: Option<Value>,
    args: Option<Value>,
    env: Option<Value>,
    cwd: Option<String>,
    startup_timeout: Option<f64>,
    request_timeout: Option<f64>,
    disabled: bool,
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn clamp_secs(raw: Option<f64>, default: Duration) -> Duration {
    match raw {
        Some(secs) if secs.is_finite() => Duration::from_secs_f64(secs.max(1.0)),
        _ => default,
    }
}

impl RawServer {
    fn into_config(self) -> Option<McpServerConfig> {
        let name = self.name.as_ref().map(scalar_to_string).unwrap_or_default().trim().to_string();
        let command = self.command.as_ref().map(scalar_to_string).unwrap_or_default().trim().to_string();
        if name.is_empty() || command.is_empty() {
            return None;
        }
        let args = match self.args {
            Some(Value::Array(items)) => items.iter().map(scalar_to_string).collect(),
            _ => Vec::new(),
        };
        let env = match self.env {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), scalar_to_string(v))).collect(),
            _ => BTreeMap::new(),
        };
        Some(McpServerConfig {
            name,
            command,
            args,
            env,
            cwd: self.cwd.filter(|c| !c.trim().is_empty()).map(PathBuf::from),
            startup_timeout: clamp_secs(self.startup_timeout, DEFAULT_STARTUP_TIMEOUT),
            request_timeout: clamp_secs(self.request_timeout, DEFAULT_REQUEST_TIMEOUT),
            disabled: self.disabled,
        })
    }
}

/// Parse a server list. Entries that are not objects or that lack a name
/// or command are skipped with a warning.
pub fn parse_mcp_servers(text: &str) -> Result<Vec<McpServerConfig>, McpError> {
    let file: RawConfigFile = serde_json::from_str(text)?;
    let items = match file.servers {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(McpError::Config("'servers' must be a list".to_string())),
    };

    let mut servers = Vec::new();
    for (idx, item) in items.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawServer>(item)
            .ok()
            .and_then(RawServer::into_config);
        match parsed {
            Some(server) => servers.push(server),
            None => warn!(index = idx, "Skipping MCP server entry without name/command"),
        }
    }
    Ok(servers)
}

/// Load the server list from `config_path`, resolved against `workspace`
/// when relative.
pub fn load_mcp_servers(config_path: &Path, workspace: &Path) -> Result<Vec<McpServerConfig>, McpError> {
    let path = if config_path.is_absolute() {
        config_path.to_path_buf()
    } else {
        workspace.join(config_path)
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| McpError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_mcp_servers(&text)
}
