//! Recurring prompts stored per workspace in `.mini_worker/tasks.json`.
//!
//! A task is due when it is enabled, not already running and its
//! `next_run_at` has passed. Each run, successful or not, reschedules the
//! task one interval from its completion.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::observability::JsonlEventSink;

pub const MIN_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub session: String,
    #[serde(default)]
    pub mcp_config: Option<String>,
    #[serde(default)]
    pub no_memory: bool,
    pub interval_secs: u64,
    /// Unix seconds.
    pub next_run_at: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub last_run_at: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_reply: Option<String>,
    #[serde(default)]
    pub runs: u64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_enabled() -> bool {
    true
}

/// What `tasks add` records; the run settings are captured at creation.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub prompt: String,
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub session: String,
    pub mcp_config: Option<String>,
    pub no_memory: bool,
    pub interval_secs: u64,
}

pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join(".mini_worker").join("tasks.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored tasks. A missing or unreadable file is an empty list;
    /// entries that are not tasks are dropped.
    pub fn list(&self) -> Vec<ScheduledTask> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => {
                warn!(path = %self.path.display(), "Task file is not a list; ignoring it");
                Vec::new()
            }
        }
    }

    pub fn add(&self, new: NewTask) -> Result<ScheduledTask> {
        let now = Utc::now().timestamp();
        let name = new.name.trim();
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().simple().to_string()[..12].to_string(),
            name: if name.is_empty() { "task".to_string() } else { name.to_string() },
            prompt: new.prompt.trim().to_string(),
            provider: new.provider,
            model: new.model,
            base_url: new.base_url,
            session: new.session,
            mcp_config: new.mcp_config,
            no_memory: new.no_memory,
            interval_secs: new.interval_secs.max(MIN_INTERVAL_SECS),
            next_run_at: now,
            enabled: true,
            status: TaskStatus::Idle,
            last_run_at: None,
            last_error: None,
            last_reply: None,
            runs: 0,
            updated_at: now,
        };
        let mut tasks = self.list();
        tasks.push(task.clone());
        self.save(&tasks)?;
        info!(id = %task.id, name = %task.name, every = task.interval_secs, "Task added");
        Ok(task)
    }

    /// Returns whether a task with `id` existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut tasks = self.list();
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Ok(false);
        }
        self.save(&tasks)?;
        Ok(true)
    }

    /// Apply `change` to the task with `id`, stamp `updated_at` and save.
    pub fn update(&self, id: &str, change: impl FnOnce(&mut ScheduledTask)) -> Result<Option<ScheduledTask>> {
        let mut tasks = self.list();
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };
        change(task);
        task.updated_at = Utc::now().timestamp();
        let updated = task.clone();
        self.save(&tasks)?;
        Ok(Some(updated))
    }

    pub fn due(&self, now: i64) -> Vec<ScheduledTask> {
        self.list()
            .into_iter()
            .filter(|t| t.enabled && t.status != TaskStatus::Running && t.next_run_at <= now)
            .collect()
    }

    fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create task dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(tasks).context("failed to serialize tasks")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write tasks: {}", self.path.display()))?;
        debug!(path = %self.path.display(), tasks = tasks.len(), "Tasks saved");
        Ok(())
    }
}

/// Run every due task once through `runner`, one after another, recording
/// `task_started` then `task_succeeded` or `task_failed`. Returns the number
/// of tasks run.
pub async fn run_due_tasks<F, Fut>(store: &TaskStore, mut runner: F, sink: Option<&JsonlEventSink>) -> Result<usize>
where
    F: FnMut(ScheduledTask) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let due = store.due(Utc::now().timestamp());
    let mut executed = 0;

    for task in due {
        executed += 1;
        store.update(&task.id, |t| {
            t.status = TaskStatus::Running;
            t.last_error = None;
            t.last_reply = None;
            t.last_run_at = Some(Utc::now().timestamp());
        })?;
        if let Some(sink) = sink {
            sink.record("task_started", json!({"task_id": task.id, "name": task.name}));
        }
        info!(id = %task.id, name = %task.name, "Running task");

        let id = task.id.clone();
        let name = task.name.clone();
        let interval = task.interval_secs.max(MIN_INTERVAL_SECS) as i64;
        let outcome = runner(task).await;

        let now = Utc::now().timestamp();
        match outcome {
            Ok(reply) => {
                store.update(&id, |t| {
                    t.status = TaskStatus::Idle;
                    t.last_reply = Some(reply);
                    t.last_error = None;
                    t.runs += 1;
                    t.next_run_at = now + interval;
                    t.last_run_at = Some(now);
                })?;
                if let Some(sink) = sink {
                    sink.record("task_succeeded", json!({"task_id": id, "name": name}));
                }
            }
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(id = %id, error = %detail, "Task failed");
                if let Some(sink) = sink {
                    sink.record("task_failed", json!({"task_id": id, "name": name, "error": detail}));
                }
                store.update(&id, |t| {
                    t.status = TaskStatus::Error;
                    t.last_error = Some(detail);
                    t.runs += 1;
                    t.next_run_at = now + interval;
                    t.last_run_at = Some(now);
                })?;
            }
        }
    }
    Ok(executed)
}
