//! Error types for agent-runner

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while running agents
#[derive(Debug, Error)]
pub enum RunnerError {
    /// No tool registered under this name
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// No agent registered under this id
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// Run record not found
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: Uuid },

    /// Model API call failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A tool handler returned an error
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// The run hit its iteration cap
    #[error("Maximum iterations ({max}) exceeded")]
    MaxIterationsExceeded { max: u32 },

    /// The model stopped because it ran out of output tokens
    #[error("Model response hit max_tokens")]
    MaxTokensExceeded,

    /// The model stopped for a reason the loop cannot handle
    #[error("Unexpected stop reason: {reason}")]
    UnexpectedStopReason { reason: String },

    /// The run was cancelled by its caller
    #[error("Run cancelled")]
    Cancelled,

    /// Content could not be carried back into the conversation
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The run is not executing in this process
    #[error("Run {run_id} is not active")]
    RunNotActive { run_id: Uuid },

    /// The run's pending-message queue is full
    #[error("Pending message queue for run {run_id} is full")]
    PendingQueueFull { run_id: Uuid },

    /// Storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] conductor_core::Error),
}

impl RunnerError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Errors that end a run (everything except per-tool failures)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ToolExecution { .. } | Self::ToolNotFound { .. })
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
