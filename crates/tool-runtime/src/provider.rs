use crate::conversation::Message;
use crate::tool::ToolSpec;
use async_trait::async_trait;
use std::time::Duration;

/// A chat model that may answer with text or with tool-call requests.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the turn loop), not the provider.
/// Implementations live in crates/llm.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// One request/response exchange: the full ordered history plus the
    /// tools currently on offer. Returns an assistant message.
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, BackendError>;

    /// Backend name for logging/debugging (e.g., "openai", "openrouter")
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mock backend for testing the turn loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::tool::ToolCall;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Scripted {
        Reply(Message),
        Fail(BackendError),
    }

    /// Returns queued replies in FIFO order. When the queue is empty it
    /// falls back to the `always` reply, or an empty assistant message.
    pub struct MockBackend {
        queue: Mutex<VecDeque<Scripted>>,
        always: Option<Message>,
        delay: Option<Duration>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self {
                queue: Mutex::new(VecDeque::new()),
                always: None,
                delay: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Answer every call with `message` once the queue is drained.
        pub fn always(message: Message) -> Self {
            Self {
                always: Some(message),
                ..Self::new()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn queue(&self, message: Message) {
            self.queue.lock().unwrap().push_back(Scripted::Reply(message));
        }

        pub fn queue_text(&self, text: &str) {
            self.queue(Message::assistant(text));
        }

        pub fn queue_tool_calls(&self, calls: Vec<ToolCall>) {
            self.queue(Message::assistant_with_tool_calls("", calls));
        }

        pub fn queue_error(&self, error: BackendError) {
            self.queue.lock().unwrap().push_back(Scripted::Fail(error));
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// Message history sent on each call so far.
        pub fn requests(&self) -> Vec<Vec<Message>> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ModelBackend for MockBackend {
        async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<Message, BackendError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Reply(message)) => Ok(message),
                Some(Scripted::Fail(error)) => Err(error),
                None => Ok(self.always.clone().unwrap_or_else(|| Message::assistant(""))),
            }
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
