//! Agent Runner - tool-calling run loop for Conductor agents
//!
//! This crate drives agents through model conversations: it executes the
//! tools they request, delegates subtasks between agents, and exposes
//! cancel/pause/resume control over runs in flight. Every step is published
//! as an event on the [`conductor_core::EventBus`].

mod active;
mod agents;
mod bridge;
mod emitter;
mod error;
mod handoff;
pub mod llm;
mod orchestrator;
mod run_loop;
pub mod testing;
pub mod tools;

pub use active::{ActiveRun, ActiveRunManager, PENDING_MESSAGE_CAPACITY};
pub use agents::{AgentDefinition, AgentInfo, AgentRegistry, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
pub use bridge::EventBridge;
pub use emitter::RunEmitter;
pub use error::{Result, RunnerError};
pub use handoff::{HandoffOutcome, HandoffTool, HANDOFF_TOOL_NAME};
pub use llm::{AnthropicClient, AnthropicConfig, LlmClient};
pub use orchestrator::{Orchestrator, StartedRun};
pub use run_loop::{RunControl, RunLoop, RunRequest, RunResult, MAX_ITERATIONS};
