use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use worker_tool_runtime::{EventSink, RuntimeEvent};

pub fn observability_dir(workspace: &Path) -> PathBuf {
    workspace.join(".mini_worker").join("observability")
}

/// Append-only JSONL event log plus per-event counters in `metrics.json`.
pub struct JsonlEventSink {
    events_path: PathBuf,
    metrics_path: PathBuf,
    session: String,
    counters: Mutex<BTreeMap<String, u64>>,
}

impl JsonlEventSink {
    /// Open (creating if needed) the observability directory of a workspace.
    /// Existing counters are carried over.
    pub fn new(workspace: &Path, session: &str) -> Result<Self> {
        let dir = observability_dir(workspace);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create observability dir: {}", dir.display()))?;
        let metrics_path = dir.join("metrics.json");
        let counters = read_counters(&metrics_path);
        info!(path = %dir.display(), "observability sink initialized");
        Ok(Self {
            events_path: dir.join("events.jsonl"),
            metrics_path,
            session: session.to_string(),
            counters: Mutex::new(counters),
        })
    }

    /// Record an event that did not come from the turn loop.
    pub fn record(&self, event: &str, fields: Value) {
        let mut record = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other);
                map
            }
        };
        record.insert("event".to_string(), json!(event));
        self.write(event, record);
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn write(&self, name: &str, mut record: Map<String, Value>) {
        record.insert("ts".to_string(), json!(Utc::now().timestamp()));
        record.insert("session".to_string(), json!(self.session));

        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        *counters.entry(name.to_string()).or_insert(0) += 1;

        if let Err(e) = self.append(&Value::Object(record)) {
            warn!(error = %e, "failed to append observability event");
        }
        let metrics = serde_json::to_string_pretty(&*counters).unwrap_or_default();
        if let Err(e) = std::fs::write(&self.metrics_path, metrics) {
            warn!(error = %e, "failed to write metrics");
        }
    }

    fn append(&self, record: &Value) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .with_context(|| format!("failed to open {}", self.events_path.display()))?;
        writeln!(file, "{record}")?;
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, event: &RuntimeEvent) {
        let record = match serde_json::to_value(event) {
            Ok(Value::Object(map)) => map,
            _ => return,
        };
        self.write(event.name(), record);
    }
}

/// Counters from a workspace's `metrics.json`; unreadable files count as empty.
pub fn read_counters(path: &Path) -> BTreeMap<String, u64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_appended_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlEventSink::new(dir.path(), "s1").unwrap();

        sink.emit(&RuntimeEvent::TurnStarted {
            turn_id: "t1".to_string(),
            input_chars: 5,
        });
        sink.emit(&RuntimeEvent::TurnCompleted {
            turn_id: "t1".to_string(),
            iterations: 1,
            duration_ms: 3,
        });
        sink.record("chat_reply", json!({"chars": 12}));

        let events = std::fs::read_to_string(observability_dir(dir.path()).join("events.jsonl")).unwrap();
        let lines: Vec<Value> = events.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], json!("turn_started"));
        assert_eq!(lines[0]["session"], json!("s1"));
        assert_eq!(lines[2]["chars"], json!(12));

        let counters = read_counters(&observability_dir(dir.path()).join("metrics.json"));
        assert_eq!(counters.get("turn_started"), Some(&1));
        assert_eq!(counters.get("chat_reply"), Some(&1));
    }

    #[test]
    fn test_counters_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        JsonlEventSink::new(dir.path(), "a").unwrap().record("chat_error", Value::Null);
        let sink = JsonlEventSink::new(dir.path(), "b").unwrap();
        sink.record("chat_error", json!("boom"));
        assert_eq!(sink.counters().get("chat_error"), Some(&2));
    }
}
