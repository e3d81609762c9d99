//! Request recording decorator
//!
//! Wraps any [`LlmInvoker`] and writes one replay file per call under the
//! run's log directory: `<logs>/<task_id>/request_<timestamp_ms>_<n>.json`.
//! The file captures the full request and the outcome so a run can be
//! replayed or audited offline.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmError, LlmInvoker};

/// Decorator that records every request/response pair to disk
pub struct RecordingInvoker {
    inner: Arc<dyn LlmInvoker>,

    /// Directory for this scope's replay files (already task-scoped)
    log_dir: PathBuf,

    /// Per-instance sequence to disambiguate same-millisecond calls
    sequence: AtomicU64,
}

impl RecordingInvoker {
    /// Wrap an invoker, recording into `log_dir`
    pub fn new(inner: Arc<dyn LlmInvoker>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            log_dir: log_dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    async fn record(&self, request: &CompletionRequest, outcome: &Result<CompletionResponse, LlmError>) {
        let ts = Utc::now().timestamp_millis();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let path = self.log_dir.join(format!("request_{}_{}.json", ts, seq));

        let record = serde_json::json!({
            "timestamp_ms": ts,
            "request": request,
            "response": match outcome {
                Ok(response) => serde_json::to_value(response).unwrap_or_default(),
                Err(_) => serde_json::Value::Null,
            },
            "error": match outcome {
                Ok(_) => serde_json::Value::Null,
                Err(e) => serde_json::Value::String(e.to_string()),
            },
        });

        // Recording failures never fail the call itself
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            warn!(error = %e, dir = %self.log_dir.display(), "Failed to create LLM log dir");
            return;
        }
        match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    warn!(error = %e, path = %path.display(), "Failed to write LLM replay file");
                } else {
                    debug!(path = %path.display(), "RecordingInvoker::record: wrote replay file");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize LLM replay record"),
        }
    }
}

#[async_trait]
impl LlmInvoker for RecordingInvoker {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let outcome = self.inner.complete(request.clone()).await;
        self.record(&request, &outcome).await;
        outcome
    }
}
