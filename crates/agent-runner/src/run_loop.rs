//! The agent run loop
//!
//! A bounded state machine:
//!
//! ```text
//! Initializing -> AwaitingModel -> { ExecutingTools <-> AwaitingModel } -> Completed
//! ```
//!
//! Every terminal path emits exactly one `run_end` event.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use conductor_core::run::{
    ApiRequestData, ApiResponseData, ErrorData, EventPayload, IterationData, MessageData,
    MessageRole, RunEndData, RunStartData, RunStatus, TokenUsage, ToolCallData, ToolResultData,
};

use crate::agents::AgentDefinition;
use crate::emitter::RunEmitter;
use crate::error::RunnerError;
use crate::llm::{ContentBlock, LlmClient, Message, MessageRequest, StopReason};
use crate::tools::ToolRegistry;

/// Hard cap on model round-trips per run
pub const MAX_ITERATIONS: u32 = 50;

const NO_SUMMARY: &str = "(no summary available)";

/// What to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: Uuid,
    pub prompt: String,
    pub history: Vec<Message>,
    /// Continue an existing run: no `run_start` is emitted
    pub resume: bool,
    pub parent_run_id: Option<Uuid>,
    pub is_handoff: bool,
}

impl RunRequest {
    /// A fresh run with a newly generated id
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            prompt: prompt.into(),
            history: Vec::new(),
            resume: false,
            parent_run_id: None,
            is_handoff: false,
        }
    }

    /// Continue `run_id` from `history`, optionally adding a new prompt (may be empty)
    pub fn resume(run_id: Uuid, history: Vec<Message>, prompt: impl Into<String>) -> Self {
        Self {
            run_id,
            prompt: prompt.into(),
            history,
            resume: true,
            parent_run_id: None,
            is_handoff: false,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Mark this run as delegated from `parent_run_id`
    pub fn handoff_from(mut self, parent_run_id: Uuid) -> Self {
        self.parent_run_id = Some(parent_run_id);
        self.is_handoff = true;
        self
    }
}

/// Cancellation scope and injected-message channel of one run
pub struct RunControl {
    pub cancel: CancellationToken,
    pub pending: Option<mpsc::Receiver<String>>,
}

impl RunControl {
    pub fn new(cancel: CancellationToken, pending: mpsc::Receiver<String>) -> Self {
        Self {
            cancel,
            pending: Some(pending),
        }
    }

    /// A control with its own token and no message channel
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pending: None,
        }
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            pending: None,
        }
    }
}

/// Outcome of a finished run
#[derive(Debug)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub error: Option<RunnerError>,
    pub iterations: u32,
    pub tool_calls: u32,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    /// Full conversation at termination
    pub messages: Vec<Message>,
    /// The last assistant turn, if the model produced one
    pub final_message: Option<Message>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn error_text(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// First text block of the final assistant turn, or a placeholder
    pub fn summary(&self) -> String {
        self.final_message
            .as_ref()
            .and_then(|m| m.first_text())
            .map(str::to_string)
            .unwrap_or_else(|| NO_SUMMARY.to_string())
    }
}

enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ContentBlock>),
}

enum Outcome {
    Success,
    Cancelled,
    Failed(RunnerError),
}

/// Drives one agent through a conversation until it finishes
pub struct RunLoop {
    agent_id: String,
    model: String,
    max_tokens: u32,
    system_prompt: Option<String>,
    max_iterations: u32,
    tools: ToolRegistry,
    llm: Arc<dyn LlmClient>,
    emitter: RunEmitter,
}

impl RunLoop {
    pub fn new(agent: &AgentDefinition, tools: ToolRegistry, llm: Arc<dyn LlmClient>, emitter: RunEmitter) -> Self {
        Self {
            agent_id: agent.id.clone(),
            model: agent.model.clone(),
            max_tokens: agent.max_tokens,
            system_prompt: (!agent.system_prompt.is_empty()).then(|| agent.system_prompt.clone()),
            max_iterations: agent.max_iterations.min(MAX_ITERATIONS),
            tools,
            llm,
            emitter,
        }
    }

    pub async fn run(&self, request: RunRequest, mut control: RunControl) -> RunResult {
        let started = Instant::now();
        let run_id = request.run_id;

        let mut messages = request.history;
        if !request.prompt.is_empty() {
            messages.push(Message::user_text(request.prompt.clone()));
        }

        if request.resume {
            debug!(
                "Resuming run {} for agent {} with {} messages",
                run_id,
                self.agent_id,
                messages.len()
            );
        } else {
            info!("Starting run {} for agent {}", run_id, self.agent_id);
            self.emitter.emit(EventPayload::RunStart(RunStartData {
                prompt: request.prompt,
                model: self.model.clone(),
                parent_run_id: request.parent_run_id,
                is_handoff: request.is_handoff,
            }));
        }

        let tool_schemas = self.tools.schemas();
        let mut iterations: u32 = 0;
        let mut tool_calls: u32 = 0;
        let mut usage = TokenUsage::default();
        let mut final_message: Option<Message> = None;
        let mut state = LoopState::AwaitingModel;

        let outcome = 'run: loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if control.cancel.is_cancelled() {
                        break 'run Outcome::Cancelled;
                    }
                    if iterations >= self.max_iterations {
                        break 'run Outcome::Failed(RunnerError::MaxIterationsExceeded {
                            max: self.max_iterations,
                        });
                    }

                    iterations += 1;
                    self.emitter
                        .emit(EventPayload::Iteration(IterationData { iteration: iterations }));

                    if let Some(text) = control.pending.as_mut().and_then(|rx| rx.try_recv().ok()) {
                        debug!("Run {} picked up an injected message", run_id);
                        self.emitter.emit(EventPayload::Message(MessageData {
                            role: MessageRole::User,
                            content: text.clone(),
                        }));
                        messages.push(Message::user_text(text));
                    }

                    let api_request = MessageRequest {
                        model: self.model.clone(),
                        max_tokens: self.max_tokens,
                        messages: messages.clone(),
                        tools: tool_schemas.clone(),
                        system: self.system_prompt.clone(),
                    };
                    self.emitter.emit(EventPayload::ApiRequest(ApiRequestData {
                        iteration: iterations,
                        model: self.model.clone(),
                        message_count: api_request.messages.len(),
                        tool_count: api_request.tools.len(),
                    }));

                    let call_started = Instant::now();
                    let response = match self.llm.send(&api_request).await {
                        Ok(response) => response,
                        Err(e) => break 'run Outcome::Failed(e),
                    };

                    usage.add(response.usage);
                    let stop_reason = response.stop_reason.clone().unwrap_or_default();
                    self.emitter.emit(EventPayload::ApiResponse(ApiResponseData {
                        iteration: iterations,
                        stop_reason,
                        usage: response.usage,
                        duration_ms: call_started.elapsed().as_millis() as u64,
                    }));

                    for block in &response.content {
                        if let ContentBlock::Text { text } = block {
                            self.emitter.emit(EventPayload::Message(MessageData {
                                role: MessageRole::Assistant,
                                content: text.clone(),
                            }));
                        }
                    }

                    if let Err(e) = response.ensure_replayable() {
                        break 'run Outcome::Failed(e);
                    }

                    let assistant = Message::assistant(response.content);
                    match StopReason::parse(response.stop_reason.as_deref()) {
                        StopReason::EndTurn => {
                            messages.push(assistant.clone());
                            final_message = Some(assistant);
                            break 'run Outcome::Success;
                        }
                        StopReason::ToolUse => {
                            let blocks = assistant.content.clone();
                            messages.push(assistant);
                            LoopState::ExecutingTools(blocks)
                        }
                        StopReason::MaxTokens => {
                            messages.push(assistant.clone());
                            final_message = Some(assistant);
                            break 'run Outcome::Failed(RunnerError::MaxTokensExceeded);
                        }
                        StopReason::Other(reason) => {
                            messages.push(assistant.clone());
                            final_message = Some(assistant);
                            break 'run Outcome::Failed(RunnerError::UnexpectedStopReason { reason });
                        }
                    }
                }

                LoopState::ExecutingTools(blocks) => {
                    let mut results = Vec::new();

                    for block in &blocks {
                        let (id, name, input) = match block {
                            ContentBlock::ToolUse { id, name, input } => (id, name, input),
                            _ => continue,
                        };

                        self.emitter.emit(EventPayload::ToolCall(ToolCallData {
                            tool_use_id: id.clone(),
                            tool_name: name.clone(),
                            input: input.clone(),
                        }));

                        let tool_started = Instant::now();
                        let (output, is_error) = match self.tools.execute(name, input.clone()).await {
                            Ok(value) => match render_output(value) {
                                Ok(output) => (output, false),
                                Err(e) => break 'run Outcome::Failed(e),
                            },
                            Err(e) => {
                                warn!("Run {}: {}", run_id, e);
                                (e.to_string(), true)
                            }
                        };
                        tool_calls += 1;

                        self.emitter.emit(EventPayload::ToolResult(ToolResultData {
                            tool_use_id: id.clone(),
                            tool_name: name.clone(),
                            output: output.clone(),
                            is_error,
                            duration_ms: tool_started.elapsed().as_millis() as u64,
                        }));
                        results.push(ContentBlock::tool_result(id.clone(), output, is_error));
                    }

                    if results.is_empty() {
                        break 'run Outcome::Failed(RunnerError::UnexpectedStopReason {
                            reason: "tool_use without tool_use blocks".to_string(),
                        });
                    }

                    messages.push(Message::tool_results(results));
                    LoopState::AwaitingModel
                }
            };
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, error) = match outcome {
            Outcome::Success => (RunStatus::Success, None),
            Outcome::Cancelled => (RunStatus::Cancelled, Some(RunnerError::Cancelled)),
            Outcome::Failed(e) => (RunStatus::Failed, Some(e)),
        };

        if status == RunStatus::Failed {
            if let Some(e) = &error {
                self.emitter.emit(EventPayload::Error(ErrorData {
                    message: e.to_string(),
                }));
            }
        }

        self.emitter.emit(EventPayload::RunEnd(RunEndData {
            status,
            success: status == RunStatus::Success,
            error: error.as_ref().map(|e| e.to_string()),
            iterations,
            tool_calls,
            duration_ms,
            usage,
        }));

        info!(
            "Run {} finished: status={} iterations={} tool_calls={}",
            run_id,
            status.as_str(),
            iterations,
            tool_calls
        );

        RunResult {
            run_id,
            status,
            error,
            iterations,
            tool_calls,
            usage,
            duration_ms,
            messages,
            final_message,
        }
    }
}

/// Tool output as text for the model: strings verbatim, anything else as JSON
fn render_output(value: Value) -> Result<String, RunnerError> {
    match value {
        Value::String(s) => Ok(s),
        other => Ok(serde_json::to_string(&other)?),
    }
}
