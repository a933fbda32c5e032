use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use worker_tool_runtime::SecurityConfig;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a pragmatic worker agent operating inside a local workspace. \
Use the available tools to inspect files, run commands and fetch pages when that helps; \
keep answers short and report what you changed.";

/// CLI configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default provider preset (openai, openrouter, minimax, custom)
    pub provider: String,

    /// Default model per provider
    pub default_models: HashMap<String, String>,

    /// API keys keyed by provider name
    pub api_keys: HashMap<String, String>,

    /// Base URL overrides keyed by provider name
    pub base_urls: HashMap<String, String>,

    /// Backend request timeout
    pub timeout_secs: u64,

    /// Model calls allowed per turn
    pub max_iterations: usize,

    /// Ceiling on one tool invocation
    pub tool_timeout_secs: u64,

    pub system_prompt: String,

    /// Session id used when `--session` is not given
    pub session: String,

    /// Protocol server list, relative to the workspace
    pub mcp_config: Option<String>,

    /// Run without loading or persisting history unless overridden
    pub no_memory: bool,

    /// Screen arguments of remote tools through the security policy
    pub gate_remote_tools: bool,

    pub security: SecurityConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            default_models: HashMap::new(),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            timeout_secs: 60,
            max_iterations: 20,
            tool_timeout_secs: 120,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            session: "default".to_string(),
            mcp_config: None,
            no_memory: false,
            gate_remote_tools: false,
            security: SecurityConfig::default(),
        }
    }
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/mini-worker/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("mini-worker");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// The given path, or the default one.
    pub fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::default_config_path(),
        }
    }

    /// Load config from the given path, or the default path.
    /// Writes and returns the default config if the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path)?;

        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?;
            Ok(config)
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            let config = Self::default();
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let toml_str = toml::to_string_pretty(&config).context("failed to serialize default config")?;
            std::fs::write(&config_path, toml_str).ok();
            Ok(config)
        }
    }

    /// Resolve the model name for a provider.
    /// Priority: cli_override > config file > built-in default.
    pub fn resolve_model(&self, provider: &str, cli_override: Option<&str>) -> String {
        if let Some(model) = cli_override.filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        if let Some(model) = self.default_models.get(provider) {
            return model.clone();
        }
        match provider {
            "minimax" => "MiniMax-M2.5".to_string(),
            "openrouter" => "openai/gpt-4.1-mini".to_string(),
            _ => "gpt-4.1-mini".to_string(),
        }
    }

    /// Config-file API key for a provider; environment and flags are
    /// layered on top by the backend config resolver.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.get(provider).filter(|k| !k.trim().is_empty()).cloned()
    }

    pub fn base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.get(provider).filter(|u| !u.trim().is_empty()).cloned()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let toml_str = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, toml_str).with_context(|| format!("failed to write config: {}", path.display()))?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Apply the set fields of `update`. Model, base URL and API key are
    /// stored per provider: the update's provider when given, else the
    /// configured one. An empty string clears a stored value.
    /// Returns whether anything was set.
    pub fn apply(&mut self, update: &ConfigUpdate) -> bool {
        let mut changed = false;
        if let Some(provider) = update.provider.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            self.provider = provider.to_lowercase();
            changed = true;
        }
        let provider = self.provider.clone();

        if let Some(model) = &update.model {
            set_or_clear(&mut self.default_models, &provider, model);
            changed = true;
        }
        if let Some(url) = &update.base_url {
            set_or_clear(&mut self.base_urls, &provider, url);
            changed = true;
        }
        if let Some(key) = &update.api_key {
            let key_provider = update.api_key_provider.clone().unwrap_or_else(|| provider.clone());
            set_or_clear(&mut self.api_keys, &key_provider, key);
            changed = true;
        }
        if let Some(session) = &update.session {
            self.session = session.trim().to_string();
            changed = true;
        }
        if let Some(secs) = update.timeout_secs {
            self.timeout_secs = secs.max(1);
            changed = true;
        }
        if let Some(max) = update.max_iterations {
            self.max_iterations = max.max(1);
            changed = true;
        }
        if let Some(path) = &update.mcp_config {
            let path = path.trim();
            self.mcp_config = (!path.is_empty()).then(|| path.to_string());
            changed = true;
        }
        if let Some(memory) = update.memory {
            self.no_memory = !memory;
            changed = true;
        }
        if let Some(gate) = update.gate_remote_tools {
            self.gate_remote_tools = gate;
            changed = true;
        }
        if let Some(allow) = update.allow_shell {
            self.security.allow_shell = allow;
            changed = true;
        }
        changed
    }

    /// JSON view with API keys masked.
    pub fn redacted(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self).context("failed to encode config")?;
        if let Some(keys) = value.get_mut("api_keys").and_then(serde_json::Value::as_object_mut) {
            for key in keys.values_mut() {
                *key = serde_json::Value::String("***".to_string());
            }
        }
        Ok(value)
    }
}

/// Field-wise changes requested by `mini-worker config`; `None` leaves a
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_key_provider: Option<String>,
    pub session: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_iterations: Option<usize>,
    pub mcp_config: Option<String>,
    pub memory: Option<bool>,
    pub gate_remote_tools: Option<bool>,
    pub allow_shell: Option<bool>,
}

fn set_or_clear(map: &mut HashMap<String, String>, provider: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        map.remove(provider);
    } else {
        map.insert(provider.to_string(), value.to_string());
    }
}
