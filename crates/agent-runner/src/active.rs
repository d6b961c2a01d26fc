//! Active run manager
//!
//! Tracks runs executing in this process so they can be cancelled or fed
//! additional user messages while they are in flight.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, RunnerError};
use crate::run_loop::RunControl;

/// Maximum number of injected messages waiting for a run
pub const PENDING_MESSAGE_CAPACITY: usize = 10;

/// Handle to a run that is currently executing
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    pending_tx: mpsc::Sender<String>,
}

/// Registry of in-flight runs
#[derive(Default)]
pub struct ActiveRunManager {
    runs: RwLock<HashMap<Uuid, ActiveRun>>,
}

impl ActiveRunManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run with a fresh cancellation token and message queue.
    ///
    /// Registering an id twice replaces the earlier entry.
    pub async fn add(&self, run_id: Uuid) -> RunControl {
        self.add_with_token(run_id, CancellationToken::new()).await
    }

    /// Register a run driven by an existing cancellation token
    pub async fn add_with_token(&self, run_id: Uuid, cancel: CancellationToken) -> RunControl {
        let (pending_tx, pending_rx) = mpsc::channel(PENDING_MESSAGE_CAPACITY);
        let entry = ActiveRun {
            run_id,
            cancel: cancel.clone(),
            started_at: Utc::now(),
            pending_tx,
        };

        if self.runs.write().await.insert(run_id, entry).is_some() {
            debug!("Replaced active run entry {}", run_id);
        }

        RunControl::new(cancel, pending_rx)
    }

    pub async fn get(&self, run_id: Uuid) -> Option<ActiveRun> {
        self.runs.read().await.get(&run_id).cloned()
    }

    pub async fn contains(&self, run_id: Uuid) -> bool {
        self.runs.read().await.contains_key(&run_id)
    }

    /// Forget a run. Returns whether it was registered.
    pub async fn remove(&self, run_id: Uuid) -> bool {
        self.runs.write().await.remove(&run_id).is_some()
    }

    /// Signal cancellation. The run stays registered until its loop exits.
    pub async fn cancel(&self, run_id: Uuid) -> Result<()> {
        let runs = self.runs.read().await;
        let run = runs.get(&run_id).ok_or(RunnerError::RunNotActive { run_id })?;
        info!("Cancelling run {}", run_id);
        run.cancel.cancel();
        Ok(())
    }

    /// Queue a user message for the run's next iteration
    pub async fn send_message(&self, run_id: Uuid, message: impl Into<String>) -> Result<()> {
        let runs = self.runs.read().await;
        let run = runs.get(&run_id).ok_or(RunnerError::RunNotActive { run_id })?;

        run.pending_tx
            .try_send(message.into())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RunnerError::PendingQueueFull { run_id },
                mpsc::error::TrySendError::Closed(_) => RunnerError::RunNotActive { run_id },
            })
    }

    /// Cancel every registered run, returning how many were signalled
    pub async fn cancel_all(&self) -> usize {
        let runs = self.runs.read().await;
        for run in runs.values() {
            run.cancel.cancel();
        }
        runs.len()
    }

    pub async fn list(&self) -> Vec<Uuid> {
        self.runs.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}
