//! HTTP GET tool with host screening on every redirect hop.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::optional_u64;
use crate::security::{truncate_chars, PolicyViolation, SecurityPolicy};
use crate::tool::{required_str, Tool, ToolContext, ToolError, ToolSpec};

const USER_AGENT: &str = concat!("mini-worker/", env!("CARGO_PKG_VERSION"));

pub struct FetchUrlTool {
    max_redirects: usize,
}

impl FetchUrlTool {
    const DEFAULT_TIMEOUT_SECS: u64 = 20;
    const DEFAULT_MAX_CHARS: u64 = 30_000;

    pub fn new() -> Self {
        Self { max_redirects: 5 }
    }

    fn client(&self, policy: Arc<SecurityPolicy>, timeout: Duration) -> Result<reqwest::Client, ToolError> {
        let max_redirects = self.max_redirects;
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error(format!("more than {max_redirects} redirects"));
            }
            match policy.check_url(attempt.url().as_str()) {
                Ok(_) => attempt.follow(),
                Err(violation) => attempt.error(violation),
            }
        });
        reqwest::Client::builder()
            .redirect(redirect)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to build HTTP client: {e}")))
    }

    /// Recover a policy rejection raised inside the redirect hook.
    fn map_request_error(err: reqwest::Error, timeout: Duration) -> ToolError {
        if err.is_timeout() {
            return ToolError::Timeout(timeout);
        }
        let mut source = err.source();
        while let Some(inner) = source {
            if let Some(violation) = inner.downcast_ref::<PolicyViolation>() {
                return ToolError::Policy(violation.clone());
            }
            source = inner.source();
        }
        ToolError::ExecutionFailed(format!("request failed: {err}"))
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "fetch_url".to_string(),
            description: "Fetch an http(s) URL and return the response body as text.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "http or https URL"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds (default 20)"},
                    "max_chars": {"type": "integer", "description": "Maximum characters returned (default 30000)"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let policy = &context.policy;
        let url = policy.check_url(required_str(&input, "url")?)?;
        let max_chars = optional_u64(&input, "max_chars", Self::DEFAULT_MAX_CHARS)? as usize;
        policy.check_fetch_chars(max_chars)?;
        let timeout = Duration::from_secs(optional_u64(&input, "timeout", Self::DEFAULT_TIMEOUT_SECS)?.max(1));

        debug!(url = %url, max_chars, "fetching url");

        let client = self.client(policy.clone(), timeout)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_request_error(e, timeout))?;
        let status = response.status();

        // Stop reading once enough bytes for `max_chars` characters arrived.
        let byte_budget = max_chars.saturating_mul(4).saturating_add(4);
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        let mut cut = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::map_request_error(e, timeout))?;
            body.extend_from_slice(&chunk);
            if body.len() > byte_budget {
                cut = true;
                break;
            }
        }

        let text = String::from_utf8_lossy(&body);
        let mut output = truncate_chars(&text, max_chars);
        if cut && !output.ends_with("...[truncated]") {
            output.push_str("\n...[truncated]");
        }
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed(format!("HTTP {status}: {output}")));
        }
        Ok(Value::String(output))
    }
}
