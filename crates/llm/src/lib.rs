pub mod config;
pub mod providers;

pub use config::{
    preset, resolve_api_config, resolve_api_config_with, ApiConfig, ApiConfigInput, ConfigError,
    ProviderPreset, PROVIDER_PRESETS,
};
pub use providers::{create_backend, OpenAiCompatBackend};
