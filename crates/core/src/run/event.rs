//! Event types for agent execution

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run_model::{RunStatus, TokenUsage};

/// Discriminant of an execution event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    RunEnd,
    Iteration,
    ApiRequest,
    ApiResponse,
    ToolCall,
    ToolResult,
    Message,
    AgentHandoff,
    AgentHandoffComplete,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::RunEnd => "run_end",
            Self::Iteration => "iteration",
            Self::ApiRequest => "api_request",
            Self::ApiResponse => "api_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Message => "message",
            Self::AgentHandoff => "agent_handoff",
            Self::AgentHandoffComplete => "agent_handoff_complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStartData {
    pub prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    #[serde(default)]
    pub is_handoff: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEndData {
    pub status: RunStatus,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: u32,
    pub tool_calls: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationData {
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequestData {
    pub iteration: u32,
    pub model: String,
    pub message_count: usize,
    pub tool_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponseData {
    pub iteration: u32,
    pub stop_reason: String,
    pub usage: TokenUsage,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    pub tool_use_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultData {
    pub tool_use_id: String,
    pub tool_name: String,
    pub output: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffData {
    pub target_agent_id: String,
    pub sub_run_id: Uuid,
    pub task_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffCompleteData {
    pub target_agent_id: String,
    pub sub_run_id: Uuid,
    pub success: bool,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// Typed event payload, serialized as `"type": ..., "data": {...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    RunStart(RunStartData),
    RunEnd(RunEndData),
    Iteration(IterationData),
    ApiRequest(ApiRequestData),
    ApiResponse(ApiResponseData),
    ToolCall(ToolCallData),
    ToolResult(ToolResultData),
    Message(MessageData),
    AgentHandoff(HandoffData),
    AgentHandoffComplete(HandoffCompleteData),
    Error(ErrorData),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::RunStart(_) => EventType::RunStart,
            Self::RunEnd(_) => EventType::RunEnd,
            Self::Iteration(_) => EventType::Iteration,
            Self::ApiRequest(_) => EventType::ApiRequest,
            Self::ApiResponse(_) => EventType::ApiResponse,
            Self::ToolCall(_) => EventType::ToolCall,
            Self::ToolResult(_) => EventType::ToolResult,
            Self::Message(_) => EventType::Message,
            Self::AgentHandoff(_) => EventType::AgentHandoff,
            Self::AgentHandoffComplete(_) => EventType::AgentHandoffComplete,
            Self::Error(_) => EventType::Error,
        }
    }
}

/// Execution event with metadata
///
/// Events are immutable once emitted; `id` is the deduplication key for
/// at-least-once consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub run_id: Uuid,
    pub agent_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        run_id: Uuid,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// A tool invocation reconstructed from a `tool_call` event and its matching
/// `tool_result` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub called_at: DateTime<Utc>,
    pub result: Option<ToolResultData>,
}

impl ToolCallRecord {
    /// Pair calls with results by tool-use id, in call order
    pub fn pair(events: &[Event]) -> Vec<ToolCallRecord> {
        let mut records: Vec<ToolCallRecord> = Vec::new();

        for event in events {
            match &event.payload {
                EventPayload::ToolCall(call) => records.push(ToolCallRecord {
                    tool_use_id: call.tool_use_id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.input.clone(),
                    called_at: event.timestamp,
                    result: None,
                }),
                EventPayload::ToolResult(result) => {
                    if let Some(record) = records
                        .iter_mut()
                        .find(|r| r.tool_use_id == result.tool_use_id && r.result.is_none())
                    {
                        record.result = Some(result.clone());
                    }
                }
                _ => {}
            }
        }

        records
    }
}
