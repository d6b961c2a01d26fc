//! Application state

use std::sync::Arc;

use agent_runner::{AgentRegistry, Orchestrator};
use conductor_core::run::Storage;

use crate::hub::Hub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    storage: Arc<dyn Storage>,
    orchestrator: Orchestrator,
    hub: Hub,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, agents: Arc<AgentRegistry>, hub: Hub) -> Self {
        let orchestrator = Orchestrator::new(agents, Arc::clone(&storage));
        Self {
            inner: Arc::new(AppStateInner {
                storage,
                orchestrator,
                hub,
            }),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        self.inner.orchestrator.agents()
    }

    pub fn hub(&self) -> &Hub {
        &self.inner.hub
    }
}
