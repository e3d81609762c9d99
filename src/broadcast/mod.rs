//! Broadcaster - fan-out of run events to subscribers
//!
//! Every message is `{type, run_id, timestamp, payload}`. Delivery is FIFO
//! per subscriber; disconnected subscribers are pruned on publish. Events
//! are also appended to a per-run JSONL log for postmortem replay.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Broadcast message types on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StateUpdate,
    TaskUpdate,
    LogMessage,
    HumanNeeded,
    RunComplete,
    Error,
    Heartbeat,
    RunListUpdate,
    Interrupted,
    TaskInterrupted,
    Status,
}

/// One broadcast message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, run_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// A state_update event with task counts and run status
    pub fn state_update(run_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(EventType::StateUpdate, run_id, payload)
    }

    /// A task_update event for one task record
    pub fn task_update(run_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(EventType::TaskUpdate, run_id, payload)
    }

    /// An error event with a stable error kind identifier
    pub fn error(run_id: impl Into<String>, kind: &str, message: &str) -> Self {
        Self::new(
            EventType::Error,
            run_id,
            serde_json::json!({ "kind": kind, "message": message }),
        )
    }
}

/// Fan-out bus for run events
///
/// Cloning is cheap; all clones share the subscriber list.
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
    /// Per-run JSONL event logs land here when set
    log_dir: Option<PathBuf>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            log_dir: None,
        }
    }

    /// Enable the per-run JSONL event log under the given directory
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            log_dir: Some(log_dir.into()),
        }
    }

    /// Register a subscriber; it receives every event published after this
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("subscriber lock poisoned").push(tx);
        debug!("Broadcaster::subscribe: subscriber added");
        rx
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock poisoned").len()
    }

    /// Publish an event to every subscriber and the event log
    ///
    /// Closed subscribers are pruned. Log failures are reported but never
    /// fail the publish.
    pub async fn publish(&self, event: Event) {
        debug!(event_type = ?event.event_type, run_id = %event.run_id, "Broadcaster::publish: called");
        {
            let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }

        if let Some(log_dir) = &self.log_dir {
            if let Err(e) = append_event_log(log_dir, &event).await {
                warn!(error = %e, "Failed to append event log");
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

async fn append_event_log(log_dir: &PathBuf, event: &Event) -> eyre::Result<()> {
    let dir = log_dir.join("events");
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(format!("{}.jsonl", event.run_id));
    let line = serde_json::to_string(event)? + "\n";

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
