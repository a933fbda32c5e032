pub mod openai_compat;

use std::sync::Arc;

use worker_tool_runtime::{BackendError, ModelBackend};

use crate::config::ApiConfig;

pub use openai_compat::OpenAiCompatBackend;

/// Create the backend for a resolved config. Every preset speaks the
/// chat-completions dialect, so they share one implementation.
pub fn create_backend(config: ApiConfig) -> Result<Arc<dyn ModelBackend>, BackendError> {
    tracing::info!(provider = %config.provider, model = %config.model, base_url = %config.base_url, "Creating model backend");
    Ok(Arc::new(OpenAiCompatBackend::new(config)?))
}
