use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use worker_tool_runtime::{Message, Role};

/// Persists one session's message sequence under
/// `<workspace>/.mini_worker/sessions/<id>.json`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    id: String,
    path: PathBuf,
}

impl SessionStore {
    pub fn new(workspace: &Path, session_id: &str) -> Self {
        let id = sanitize_session_id(session_id);
        let path = sessions_dir(workspace).join(format!("{id}.json"));
        Self { id, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved messages. A missing file is an empty session;
    /// entries that are not messages are dropped.
    pub fn load(&self) -> Result<Vec<Message>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session: {}", self.path.display()))?;
        let raw: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse session: {}", self.path.display()))?;

        let Some(items) = raw.as_array() else {
            warn!(path = %self.path.display(), "Session file is not a list; starting fresh");
            return Ok(Vec::new());
        };
        let messages: Vec<Message> = items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect();
        debug!(id = %self.id, messages = messages.len(), "Session loaded");
        Ok(messages)
    }

    /// Save the session to disk.
    pub fn save(&self, messages: &[Message]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create sessions dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(messages).context("failed to serialize session")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write session: {}", self.path.display()))?;
        debug!(id = %self.id, path = %self.path.display(), "Session saved");
        Ok(())
    }
}

pub fn sessions_dir(workspace: &Path) -> PathBuf {
    workspace.join(".mini_worker").join("sessions")
}

/// Number of saved sessions in a workspace.
pub fn count_sessions(workspace: &Path) -> usize {
    std::fs::read_dir(sessions_dir(workspace))
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count()
        })
        .unwrap_or(0)
}

/// Keep `[A-Za-z0-9_-]`; an id with nothing left becomes `default`.
fn sanitize_session_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// User-visible turns in a saved sequence, for the resume banner.
pub fn user_turns(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role == Role::User).count()
}
