//! TaskStore - actor that owns the authoritative run state
//!
//! One actor owns every run hosted by the process; commands arrive over a
//! channel and are answered on oneshot replies, so all writes to a run are
//! serialized. The patch version is a per-run monotonic counter the dispatch
//! loop uses to detect mutation-free (deadlocked) iterations.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::Run;

use super::messages::{StoreCommand, StoreError, StoreResponse};
use super::patch::{apply_patch, RunPatch};

/// Handle to send commands to the store actor
#[derive(Clone)]
pub struct TaskStore {
    tx: mpsc::Sender<StoreCommand>,
}

impl TaskStore {
    /// Spawn a new store actor
    pub fn spawn() -> Self {
        debug!("TaskStore::spawn: called");
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(rx));
        info!("TaskStore spawned");
        Self { tx }
    }

    /// Register a new run
    pub async fn create_run(&self, run: Run) -> StoreResponse<String> {
        debug!(run_id = %run.run_id, "create_run: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::CreateRun { run, reply: reply_tx })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Get a snapshot of a run
    pub async fn get_run(&self, run_id: &str) -> StoreResponse<Option<Run>> {
        debug!(%run_id, "get_run: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::GetRun {
                run_id: run_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Get a run, erroring if absent
    pub async fn get_run_required(&self, run_id: &str) -> StoreResponse<Run> {
        debug!(%run_id, "get_run_required: called");
        self.get_run(run_id)
            .await?
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    /// Apply a reducer patch; returns the run's new version
    pub async fn apply(&self, run_id: &str, patch: RunPatch) -> StoreResponse<u64> {
        debug!(%run_id, "apply: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ApplyPatch {
                run_id: run_id.to_string(),
                patch,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Ids of every run hosted in this process
    pub async fn list_run_ids(&self) -> StoreResponse<Vec<String>> {
        debug!("list_run_ids: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ListRunIds { reply: reply_tx })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Current patch version of a run
    pub async fn version(&self, run_id: &str) -> StoreResponse<u64> {
        debug!(%run_id, "version: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Version {
                run_id: run_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::ChannelError)?;
        reply_rx.await.map_err(|_| StoreError::ChannelError)?
    }

    /// Shut down the actor
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        debug!("shutdown: called");
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::ChannelError)
    }
}

struct RunSlot {
    run: Run,
    version: u64,
}

/// The actor loop that owns the runs and processes commands
async fn actor_loop(mut rx: mpsc::Receiver<StoreCommand>) {
    debug!("TaskStore actor started");
    let mut runs: HashMap<String, RunSlot> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::CreateRun { run, reply } => {
                debug!(run_id = %run.run_id, "actor_loop: CreateRun command");
                let result = if runs.contains_key(&run.run_id) {
                    Err(StoreError::DuplicateRun(run.run_id.clone()))
                } else {
                    let run_id = run.run_id.clone();
                    runs.insert(run_id.clone(), RunSlot { run, version: 0 });
                    Ok(run_id)
                };
                let _ = reply.send(result);
            }

            StoreCommand::GetRun { run_id, reply } => {
                debug!(%run_id, "actor_loop: GetRun command");
                let result = Ok(runs.get(&run_id).map(|slot| slot.run.clone()));
                let _ = reply.send(result);
            }

            StoreCommand::ApplyPatch { run_id, patch, reply } => {
                debug!(%run_id, "actor_loop: ApplyPatch command");
                let result = match runs.get_mut(&run_id) {
                    Some(slot) => match apply_patch(&mut slot.run, &patch) {
                        Ok(changed) => {
                            if !changed.is_empty() || !patch.is_empty() {
                                slot.version += 1;
                            }
                            Ok(slot.version)
                        }
                        Err(e) => Err(e),
                    },
                    None => Err(StoreError::RunNotFound(run_id)),
                };
                let _ = reply.send(result);
            }

            StoreCommand::ListRunIds { reply } => {
                debug!("actor_loop: ListRunIds command");
                let _ = reply.send(Ok(runs.keys().cloned().collect()));
            }

            StoreCommand::Version { run_id, reply } => {
                debug!(%run_id, "actor_loop: Version command");
                let result = runs
                    .get(&run_id)
                    .map(|slot| slot.version)
                    .ok_or(StoreError::RunNotFound(run_id));
                let _ = reply.send(result);
            }

            StoreCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("TaskStore shutting down");
                break;
            }
        }
    }

    debug!("TaskStore actor stopped");
}
