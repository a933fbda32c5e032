//! Structured events emitted by the turn loop to an injected sink.

use crate::tool::ToolErrorKind;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    TurnStarted {
        turn_id: String,
        input_chars: usize,
    },
    ModelResponded {
        turn_id: String,
        iteration: usize,
        tool_calls: usize,
        duration_ms: u64,
    },
    ToolInvoked {
        turn_id: String,
        call_id: String,
        name: String,
        duration_ms: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ToolErrorKind>,
    },
    TurnCompleted {
        turn_id: String,
        iterations: usize,
        duration_ms: u64,
    },
    TurnFailed {
        turn_id: String,
        error: String,
        duration_ms: u64,
    },
}

impl RuntimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeEvent::TurnStarted { .. } => "turn_started",
            RuntimeEvent::ModelResponded { .. } => "model_responded",
            RuntimeEvent::ToolInvoked { .. } => "tool_invoked",
            RuntimeEvent::TurnCompleted { .. } => "turn_completed",
            RuntimeEvent::TurnFailed { .. } => "turn_failed",
        }
    }
}

/// Receives runtime events. Implementations must not block for long; they
/// are called inline from the turn loop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RuntimeEvent);
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &RuntimeEvent) {}
}

/// Keeps events in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RuntimeEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RuntimeEvent::name).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RuntimeEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
