//! Provider presets and API configuration resolution.

use std::time::Duration;

/// Endpoint defaults and environment variable names for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub key_env: &'static str,
    pub base_env: &'static str,
}

pub const PROVIDER_PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "custom",
        base_url: "https://api.openai.com/v1",
        key_env: "OPENAI_API_KEY",
        base_env: "OPENAI_BASE_URL",
    },
    ProviderPreset {
        name: "minimax",
        base_url: "https://api.minimaxi.com/v1",
        key_env: "MINIMAX_API_KEY",
        base_env: "MINIMAX_BASE_URL",
    },
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        key_env: "OPENAI_API_KEY",
        base_env: "OPENAI_BASE_URL",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        key_env: "OPENROUTER_API_KEY",
        base_env: "OPENROUTER_BASE_URL",
    },
];

const MINIMAX_MODEL_ALIASES: &[(&str, &str)] = &[
    ("minmax", "MiniMax-M2.5"),
    ("minimax2.5", "MiniMax-M2.5"),
    ("m2.5", "MiniMax-M2.5"),
    ("minimax-m2.5", "MiniMax-M2.5"),
];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub fn preset(name: &str) -> Option<&'static ProviderPreset> {
    let wanted = name.trim().to_lowercase();
    PROVIDER_PRESETS.iter().find(|p| p.name == wanted)
}

/// Map a MiniMax shorthand (`m2.5`, `minmax`, ...) to the served model id.
pub fn resolve_minimax_alias(model: &str) -> &str {
    let key = model.to_lowercase();
    MINIMAX_MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, target)| *target)
        .unwrap_or(model)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown provider '{provider}'. Available: {available}")]
    UnknownProvider { provider: String, available: String },
    #[error("API key missing. Provide --api-key or set {key_env} (or OPENAI_API_KEY)")]
    MissingApiKey { key_env: String },
    #[error("model cannot be empty")]
    EmptyModel,
}

/// Everything a backend needs to talk to one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Raw inputs to [`resolve_api_config`], highest priority first within
/// each field: explicit flag, then environment, then config file, then
/// the preset default.
#[derive(Debug, Clone, Default)]
pub struct ApiConfigInput {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub file_api_key: Option<String>,
    pub file_base_url: Option<String>,
    pub timeout: Option<Duration>,
}

/// Resolve against the process environment.
pub fn resolve_api_config(input: ApiConfigInput) -> Result<ApiConfig, ConfigError> {
    resolve_api_config_with(input, |key| std::env::var(key).ok())
}

/// Resolve with an injectable environment lookup.
pub fn resolve_api_config_with<F>(input: ApiConfigInput, env: F) -> Result<ApiConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let selected = input.provider.trim().to_lowercase();
    let preset = preset(&selected).ok_or_else(|| ConfigError::UnknownProvider {
        provider: input.provider.clone(),
        available: PROVIDER_PRESETS.iter().map(|p| p.name).collect::<Vec<_>>().join(", "),
    })?;

    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let api_key = non_empty(input.api_key)
        .or_else(|| non_empty(env(preset.key_env)))
        .or_else(|| non_empty(env("OPENAI_API_KEY")))
        .or_else(|| non_empty(input.file_api_key))
        .ok_or_else(|| ConfigError::MissingApiKey {
            key_env: preset.key_env.to_string(),
        })?;

    let base_url = non_empty(input.base_url)
        .or_else(|| non_empty(env(preset.base_env)))
        .or_else(|| non_empty(env("OPENAI_BASE_URL")))
        .or_else(|| non_empty(input.file_base_url))
        .unwrap_or_else(|| preset.base_url.to_string())
        .trim_end_matches('/')
        .to_string();

    let mut model = input.model.trim().to_string();
    if model.is_empty() {
        return Err(ConfigError::EmptyModel);
    }
    if preset.name == "minimax" {
        model = resolve_minimax_alias(&model).to_string();
    }

    Ok(ApiConfig {
        provider: preset.name.to_string(),
        model,
        api_key,
        base_url,
        timeout: input.timeout.unwrap_or(DEFAULT_TIMEOUT),
    })
}
