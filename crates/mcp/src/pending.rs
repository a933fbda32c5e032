//! Correlation of outstanding requests with their responses.
//!
//! Each request owns one slot keyed by its id. The slot is removed exactly
//! once: by the reader delivering a response, by the waiter timing out or
//! being dropped, or by [`PendingTable::fail_all`] when the peer goes away.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::McpError;

pub type Reply = Result<Value, McpError>;

struct Slot {
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    slots: HashMap<i64, Slot>,
    /// Set once the peer is gone; new registrations fail fast with this reason.
    closed: Option<String>,
}

/// Shared between the request side and the reader task.
#[derive(Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<Inner>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate an id and a delivery slot for a request about to be sent.
    pub fn register(&self, method: &str) -> Result<PendingRequest, McpError> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.closed {
            return Err(McpError::ProcessTerminated(reason.clone()));
        }
        let id = loop {
            inner.next_id = inner.next_id.wrapping_add(1).max(1);
            if !inner.slots.contains_key(&inner.next_id) {
                break inner.next_id;
            }
        };
        let (tx, rx) = oneshot::channel();
        inner.slots.insert(
            id,
            Slot {
                method: method.to_string(),
                issued_at: Instant::now(),
                tx,
            },
        );
        Ok(PendingRequest {
            id,
            method: method.to_string(),
            rx: Some(rx),
            table: self.clone(),
        })
    }

    /// Deliver a reply to the request with `id`. Returns `false` when no
    /// such request is outstanding.
    pub fn complete(&self, id: i64, reply: Reply) -> bool {
        let slot = self.lock().slots.remove(&id);
        match slot {
            Some(slot) => {
                debug!(
                    id,
                    method = %slot.method,
                    elapsed_ms = slot.issued_at.elapsed().as_millis() as u64,
                    "Response matched"
                );
                // The waiter may have just given up; nothing to do then.
                let _ = slot.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request and refuse new ones.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<Slot> = {
            let mut inner = self.lock();
            inner.closed.get_or_insert_with(|| reason.to_string());
            inner.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            let _ = slot
                .tx
                .send(Err(McpError::ProcessTerminated(format!("{reason} (while awaiting '{}')", slot.method))));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: i64) {
        self.lock().slots.remove(&id);
    }
}

/// Waiting side of one outstanding request. Dropping it (on timeout or
/// cancellation of the caller) releases the slot.
pub struct PendingRequest {
    id: i64,
    method: String,
    rx: Option<oneshot::Receiver<Reply>>,
    table: PendingTable,
}

impl PendingRequest {
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Wait for the matching reply, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Reply {
        let Some(rx) = self.rx.take() else {
            return Err(McpError::Protocol("pending request already awaited".to_string()));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(McpError::ProcessTerminated(format!(
                "reply channel closed while awaiting '{}'",
                self.method
            ))),
            Err(_) => Err(McpError::RequestTimeout {
                method: self.method.clone(),
                timeout,
            }),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
