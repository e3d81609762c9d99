//! TaskQueue - bounded pool of in-flight worker jobs
//!
//! At most one live job per task id, at most `max_concurrent` jobs total.
//! Jobs signal completion over an internal channel; the dispatch loop is the
//! sole consumer and drains with [`collect_completed`](TaskQueue::collect_completed)
//! or parks on [`wait_for_any`](TaskQueue::wait_for_any). Cancellation is
//! cooperative: a job receives a [`CancelToken`] and must unwind (kill
//! subprocesses, skip trunk operations) before finishing.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a job produced no result
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Job cancelled")]
    Cancelled,
}

/// A drained completion
#[derive(Debug)]
pub struct Completion<R> {
    pub task_id: String,
    pub outcome: Result<R, JobError>,
}

/// Cooperative cancellation signal handed to every job
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires, for detached executions
    pub fn noop() -> Self {
        let (tx, rx) = watch::channel(false);
        // The sender leaks by design: the token must stay un-cancelled
        std::mem::forget(tx);
        Self { rx }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

struct JobEntry {
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

/// Bounded pool of background jobs keyed by task id
pub struct TaskQueue<R> {
    max_concurrent: usize,
    jobs: HashMap<String, JobEntry>,
    completion_tx: mpsc::UnboundedSender<Completion<R>>,
    completion_rx: mpsc::UnboundedReceiver<Completion<R>>,
    /// Completions received by wait_for_any but not yet collected
    pending: VecDeque<Completion<R>>,
}

impl<R: Send + 'static> TaskQueue<R> {
    pub fn new(max_concurrent: usize) -> Self {
        debug!(max_concurrent, "TaskQueue::new: called");
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            max_concurrent,
            jobs: HashMap::new(),
            completion_tx,
            completion_rx,
            pending: VecDeque::new(),
        }
    }

    /// Number of live (unfinished) jobs
    pub fn active_count(&self) -> usize {
        self.jobs.values().filter(|j| !j.handle.is_finished()).count()
    }

    /// Slots free for new jobs
    pub fn available_slots(&self) -> usize {
        self.max_concurrent.saturating_sub(self.active_count())
    }

    /// Whether any job is live or any completion is uncollected
    pub fn has_work(&self) -> bool {
        !self.jobs.is_empty() || !self.pending.is_empty()
    }

    /// Start a job for a task
    ///
    /// Returns false when the pool is at capacity or the task already has a
    /// live job. The factory receives the job's cancel token.
    pub fn spawn<F, Fut>(&mut self, task_id: &str, make_job: F) -> bool
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
    {
        debug!(%task_id, "TaskQueue::spawn: called");

        if self.jobs.contains_key(task_id) {
            warn!(%task_id, "TaskQueue::spawn: task already has a job");
            return false;
        }
        if self.available_slots() == 0 {
            debug!(%task_id, "TaskQueue::spawn: at capacity");
            return false;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let token = CancelToken { rx: cancel_rx };
        let fut = make_job(token);

        let tx = self.completion_tx.clone();
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            let outcome = match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => Ok(result),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(JobError::Panicked(message))
                }
            };
            let _ = tx.send(Completion { task_id: id, outcome });
        });

        self.jobs.insert(
            task_id.to_string(),
            JobEntry { handle, cancel_tx },
        );
        info!(%task_id, active = self.active_count(), "Spawned worker job");
        true
    }

    /// Drain finished jobs without blocking
    pub fn collect_completed(&mut self) -> Vec<Completion<R>> {
        let mut completed: Vec<Completion<R>> = self.pending.drain(..).collect();

        while let Ok(completion) = self.completion_rx.try_recv() {
            completed.push(completion);
        }

        for completion in &completed {
            self.jobs.remove(&completion.task_id);
        }

        // Aborted jobs never send; reap their entries as cancellations
        let aborted: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, j)| j.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in aborted {
            // A completion may still be racing through the channel
            if let Ok(completion) = self.completion_rx.try_recv() {
                self.jobs.remove(&completion.task_id);
                completed.push(completion);
                continue;
            }
            debug!(%task_id, "TaskQueue::collect_completed: reaping aborted job");
            self.jobs.remove(&task_id);
            completed.push(Completion {
                task_id,
                outcome: Err(JobError::Cancelled),
            });
        }

        if !completed.is_empty() {
            debug!(count = completed.len(), "TaskQueue::collect_completed: drained");
        }
        completed
    }

    /// Park until at least one job finishes or the timeout elapses
    ///
    /// Returns true when a completion is waiting to be collected.
    pub async fn wait_for_any(&mut self, timeout: Duration) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        match tokio::time::timeout(timeout, self.completion_rx.recv()).await {
            Ok(Some(completion)) => {
                self.pending.push_back(completion);
                true
            }
            _ => false,
        }
    }

    /// Request cooperative cancellation of one job
    pub fn cancel(&mut self, task_id: &str) {
        debug!(%task_id, "TaskQueue::cancel: called");
        if let Some(entry) = self.jobs.get(task_id) {
            let _ = entry.cancel_tx.send(true);
        } else {
            debug!(%task_id, "TaskQueue::cancel: no such job");
        }
    }

    /// Terminal shutdown: signal every job, then abort what remains
    pub fn cancel_all(&mut self) {
        info!(count = self.jobs.len(), "TaskQueue::cancel_all: called");
        for entry in self.jobs.values() {
            let _ = entry.cancel_tx.send(true);
        }
        for (task_id, entry) in self.jobs.drain() {
            debug!(%task_id, "TaskQueue::cancel_all: aborting job");
            entry.handle.abort();
        }
        self.pending.clear();
        while self.completion_rx.try_recv().is_ok() {}
    }
}
