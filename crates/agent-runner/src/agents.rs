//! Agent definitions and the registry that runs them

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use conductor_core::EventBus;

use crate::active::ActiveRunManager;
use crate::emitter::RunEmitter;
use crate::error::{Result, RunnerError};
use crate::handoff::HandoffTool;
use crate::llm::LlmClient;
use crate::run_loop::{RunControl, RunLoop, RunRequest, RunResult, MAX_ITERATIONS};
use crate::tools::ToolRegistry;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// A named agent: model settings, system prompt and tool set
#[derive(Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub tools: ToolRegistry,
    /// Whether the agent gets the handoff tool
    pub can_delegate: bool,
    pub max_iterations: u32,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: String::new(),
            tools: ToolRegistry::new(),
            can_delegate: false,
            max_iterations: MAX_ITERATIONS,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn delegating(mut self) -> Self {
        self.can_delegate = true;
        self
    }

    /// Lower the iteration cap. Values above the global cap are clamped by the run loop.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            model: self.model.clone(),
            tools: self.tools.names(),
            can_delegate: self.can_delegate,
        }
    }
}

/// Public view of an agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub model: String,
    pub tools: Vec<String>,
    pub can_delegate: bool,
}

/// All agents known to this process, plus the collaborators their runs need
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
    llm: Arc<dyn LlmClient>,
    bus: EventBus,
    active: Arc<ActiveRunManager>,
}

impl AgentRegistry {
    pub fn new(llm: Arc<dyn LlmClient>, bus: EventBus) -> Self {
        Self {
            agents: HashMap::new(),
            llm,
            bus,
            active: Arc::new(ActiveRunManager::new()),
        }
    }

    pub fn with_active_runs(mut self, active: Arc<ActiveRunManager>) -> Self {
        self.active = active;
        self
    }

    pub fn register(&mut self, agent: AgentDefinition) {
        debug!("Registering agent {} ({})", agent.id, agent.name);
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDefinition> {
        self.agents.get(agent_id)
    }

    pub fn has(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Agents sorted by id
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self.agents.values().map(AgentDefinition::info).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn active_runs(&self) -> &Arc<ActiveRunManager> {
        &self.active
    }

    /// Run `agent_id` to completion on the calling task
    pub async fn run_agent(
        self: &Arc<Self>,
        agent_id: &str,
        request: RunRequest,
        control: RunControl,
    ) -> Result<RunResult> {
        let agent = self.agents.get(agent_id).ok_or_else(|| RunnerError::AgentNotFound {
            agent_id: agent_id.to_string(),
        })?;

        let emitter = RunEmitter::new(self.bus.clone(), request.run_id, &agent.id, &agent.name);

        let mut tools = agent.tools.clone();
        if agent.can_delegate {
            let handoff = HandoffTool::new(Arc::clone(self), emitter.clone());
            tools.register(HandoffTool::schema(), Arc::new(handoff));
        }

        let run_loop = RunLoop::new(agent, tools, Arc::clone(&self.llm), emitter);
        Ok(run_loop.run(request, control).await)
    }
}
