//! Run control plane
//!
//! Starts runs on background tasks and routes stop/pause/resume requests to
//! them through the [`ActiveRunManager`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use conductor_core::run::{RunStatus, RunUpdate, Storage};

use crate::active::ActiveRunManager;
use crate::agents::AgentRegistry;
use crate::error::{Result, RunnerError};
use crate::run_loop::{RunRequest, RunResult};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// A run started in the background
pub struct StartedRun {
    pub run_id: Uuid,
    pub handle: JoinHandle<Result<RunResult>>,
}

pub struct Orchestrator {
    agents: Arc<AgentRegistry>,
    storage: Arc<dyn Storage>,
}

impl Orchestrator {
    pub fn new(agents: Arc<AgentRegistry>, storage: Arc<dyn Storage>) -> Self {
        Self { agents, storage }
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    fn active(&self) -> &Arc<ActiveRunManager> {
        self.agents.active_runs()
    }

    /// Start `agent_id` on `prompt` in the background
    pub async fn start_run(&self, agent_id: &str, prompt: impl Into<String>) -> Result<StartedRun> {
        if !self.agents.has(agent_id) {
            return Err(RunnerError::AgentNotFound {
                agent_id: agent_id.to_string(),
            });
        }

        let request = RunRequest::new(prompt);
        let run_id = request.run_id;
        let control = self.active().add(run_id).await;

        info!("Starting run {} for agent {}", run_id, agent_id);
        let agents = Arc::clone(&self.agents);
        let agent_id = agent_id.to_string();
        let handle = tokio::spawn(async move {
            let result = agents.run_agent(&agent_id, request, control).await;
            agents.active_runs().remove(run_id).await;

            match &result {
                Ok(run) if !run.success() => {
                    warn!("Run {} ended with status {}", run_id, run.status.as_str())
                }
                Err(e) => error!("Run {} could not start: {}", run_id, e),
                _ => {}
            }
            result
        });

        Ok(StartedRun { run_id, handle })
    }

    /// Request cancellation; the run stops at its next iteration boundary
    pub async fn stop_run(&self, run_id: Uuid) -> Result<()> {
        self.active().cancel(run_id).await
    }

    /// Mark an active run as paused. The loop keeps its state; this only
    /// changes the recorded status until the run is resumed or ends.
    pub async fn pause_run(&self, run_id: Uuid) -> Result<()> {
        if !self.active().contains(run_id).await {
            return Err(RunnerError::RunNotActive { run_id });
        }

        let run = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or(RunnerError::RunNotFound { run_id })?;
        if run.status.is_terminal() {
            return Err(RunnerError::RunNotActive { run_id });
        }

        // run_end may have been projected since the read; the record keeps its terminal status
        let run = self
            .storage
            .update_run(run_id, RunUpdate::status(RunStatus::Paused))
            .await?;
        if run.status != RunStatus::Paused {
            return Err(RunnerError::RunNotActive { run_id });
        }
        info!("Paused run {}", run_id);
        Ok(())
    }

    /// Resume an active run, optionally queueing a user message for its next iteration
    pub async fn resume_run(&self, run_id: Uuid, message: Option<String>) -> Result<()> {
        if !self.active().contains(run_id).await {
            return Err(RunnerError::RunNotActive { run_id });
        }

        if let Some(run) = self.storage.get_run(run_id).await? {
            if run.status == RunStatus::Paused {
                let run = self
                    .storage
                    .update_run(run_id, RunUpdate::status(RunStatus::Running))
                    .await?;
                if run.is_terminal() {
                    return Err(RunnerError::RunNotActive { run_id });
                }
            }
        }

        if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
            self.active().send_message(run_id, message).await?;
        }
        info!("Resumed run {}", run_id);
        Ok(())
    }

    pub async fn is_active(&self, run_id: Uuid) -> bool {
        self.active().contains(run_id).await
    }

    pub async fn active_runs(&self) -> Vec<Uuid> {
        self.active().list().await
    }

    /// Cancel every active run and wait up to `grace` for them to finish.
    /// Returns whether all runs drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let cancelled = self.active().cancel_all().await;
        if cancelled > 0 {
            info!("Cancelling {} active runs", cancelled);
        }

        let deadline = Instant::now() + grace;
        while !self.active().is_empty().await {
            if Instant::now() >= deadline {
                warn!("{} runs still active after shutdown grace period", self.active().len().await);
                return false;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        true
    }
}
