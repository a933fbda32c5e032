//! OpenAI-compatible chat-completions backend.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect with
//! function tools (OpenAI, OpenRouter, MiniMax, self-hosted gateways).

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use worker_tool_runtime::{BackendError, Message, ModelBackend, Role, ToolCall, ToolSpec};

use crate::config::ApiConfig;

pub const DEFAULT_TEMPERATURE: f32 = 0.2;

pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    config: ApiConfig,
    temperature: f32,
}

impl OpenAiCompatBackend {
    pub fn new(config: ApiConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            config,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_spec_to_openai).collect());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

// ---------------------------------------------------------------------------
// Message translation
// ---------------------------------------------------------------------------

/// Translate a [`ToolSpec`] into the function-tool format.
pub fn tool_spec_to_openai(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.input_schema,
        }
    })
}

/// Translate a [`Message`] into a chat-completions message object.
pub fn message_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({"role": "system", "content": msg.content}),
        Role::User => json!({"role": "user", "content": msg.content}),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut out = json!({"role": "assistant", "content": msg.content});
            if msg.has_tool_calls() {
                out["tool_calls"] = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": if tc.input.is_null() { "{}".to_string() } else { tc.input.to_string() },
                            }
                        })
                    })
                    .collect();
            }
            out
        }
    }
}

/// Parse `choices[0].message` of a completion response into an assistant
/// message. Tool-call arguments arrive as JSON text; unparseable or
/// non-object arguments become an empty object.
pub fn parse_completion(response: &Value) -> Result<Message, BackendError> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| BackendError::InvalidResponse("missing choices[0].message".to_string()))?;

    let content = match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        // Some gateways send content as a list of text parts.
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    let mut calls = Vec::new();
    if let Some(Value::Array(raw_calls)) = message.get("tool_calls") {
        for raw in raw_calls {
            let function = raw.get("function").unwrap_or(&Value::Null);
            let Some(name) = function.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) else {
                warn!("Skipping tool call without a function name");
                continue;
            };
            let id = raw.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            calls.push(ToolCall {
                id,
                name: name.to_string(),
                input: parse_arguments(name, function.get("arguments")),
            });
        }
    }

    Ok(Message::assistant_with_tool_calls(content, calls))
}

fn parse_arguments(tool: &str, raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(text)) if text.trim().is_empty() => Value::Object(Map::new()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            Ok(_) | Err(_) => {
                warn!(tool, "Tool call arguments are not a JSON object; using {{}}");
                Value::Object(Map::new())
            }
        },
        Some(obj @ Value::Object(_)) => obj.clone(),
        _ => Value::Object(Map::new()),
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Network(err.to_string())
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, BackendError> {
        let url = self.endpoint();
        let body = self.request_body(messages, tools);
        debug!(url = %url, model = %self.config.model, messages = messages.len(), tools = tools.len(), "Chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.config.timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::AuthError);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited {
                retry_after_secs: retry_after(response.headers()),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let reply = parse_completion(&payload)?;
        debug!(tool_calls = reply.tool_calls.len(), chars = reply.content.len(), "Chat completion response");
        Ok(reply)
    }

    fn name(&self) -> &str {
        &self.config.provider
    }
}
