//! Agent-to-agent delegation
//!
//! The handoff tool runs the target agent's full loop inside the caller's
//! tool-execution step and returns a summary of the child run as the tool
//! result. Children get their own cancellation token: stopping the parent
//! does not interrupt a delegation already in flight, but the child can be
//! stopped directly by its run id.

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use conductor_core::run::{EventPayload, HandoffCompleteData, HandoffData};

use crate::agents::AgentRegistry;
use crate::emitter::RunEmitter;
use crate::llm::ToolSchema;
use crate::run_loop::RunRequest;
use crate::tools::ToolHandler;

pub const HANDOFF_TOOL_NAME: &str = "handoff";

#[derive(Debug, Deserialize)]
struct HandoffArgs {
    target_agent_id: String,
    task_description: String,
}

/// Result returned to the delegating agent
#[derive(Debug, Clone, Serialize)]
pub struct HandoffOutcome {
    pub success: bool,
    pub sub_run_id: Uuid,
    pub agent_id: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handoff tool bound to one parent run
pub struct HandoffTool {
    agents: Arc<AgentRegistry>,
    parent: RunEmitter,
}

impl HandoffTool {
    pub fn new(agents: Arc<AgentRegistry>, parent: RunEmitter) -> Self {
        Self { agents, parent }
    }

    pub fn schema() -> ToolSchema {
        ToolSchema {
            name: HANDOFF_TOOL_NAME.to_string(),
            description: "Delegate a subtask to another agent and wait for its result.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target_agent_id": {
                        "type": "string",
                        "description": "Id of the agent that should perform the task"
                    },
                    "task_description": {
                        "type": "string",
                        "description": "Complete description of the task for the target agent"
                    }
                },
                "required": ["target_agent_id", "task_description"]
            }),
        }
    }

    async fn delegate(&self, args: HandoffArgs) -> anyhow::Result<HandoffOutcome> {
        if !self.agents.has(&args.target_agent_id) {
            bail!("Agent not found: {}", args.target_agent_id);
        }

        let parent_run_id = self.parent.run_id();
        let sub_run_id = Uuid::new_v4();
        let started = Instant::now();

        info!(
            "Run {} delegating to agent {} as run {}",
            parent_run_id, args.target_agent_id, sub_run_id
        );
        self.parent.emit(EventPayload::AgentHandoff(HandoffData {
            target_agent_id: args.target_agent_id.clone(),
            sub_run_id,
            task_description: args.task_description.clone(),
        }));

        let active = self.agents.active_runs();
        let control = active.add(sub_run_id).await;
        let request = RunRequest::new(args.task_description)
            .with_run_id(sub_run_id)
            .handoff_from(parent_run_id);

        let result = self
            .agents
            .run_agent(&args.target_agent_id, request, control)
            .await;
        active.remove(sub_run_id).await;

        let outcome = match result {
            Ok(result) => HandoffOutcome {
                success: result.success(),
                sub_run_id,
                agent_id: args.target_agent_id.clone(),
                summary: result.summary(),
                error: result.error_text(),
            },
            Err(e) => HandoffOutcome {
                success: false,
                sub_run_id,
                agent_id: args.target_agent_id.clone(),
                summary: String::new(),
                error: Some(e.to_string()),
            },
        };

        self.parent
            .emit(EventPayload::AgentHandoffComplete(HandoffCompleteData {
                target_agent_id: outcome.agent_id.clone(),
                sub_run_id,
                success: outcome.success,
                summary: outcome.summary.clone(),
                error: outcome.error.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            }));

        Ok(outcome)
    }
}

#[async_trait]
impl ToolHandler for HandoffTool {
    async fn call(&self, input: Value) -> anyhow::Result<Value> {
        let args: HandoffArgs = serde_json::from_value(input)?;
        let outcome = self.delegate(args).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}
