//! Test doubles for driving runs without a model API

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use conductor_core::run::TokenUsage;

use crate::error::{Result, RunnerError};
use crate::llm::{ContentBlock, LlmClient, MessageRequest, MessageResponse};

#[derive(Default)]
struct Script {
    responses: VecDeque<std::result::Result<MessageResponse, String>>,
    fallback: Option<MessageResponse>,
    requests: Vec<MessageRequest>,
}

/// An [`LlmClient`] that replays queued responses in order.
///
/// Once the queue is empty the fallback response is repeated; without one,
/// every further call fails with a transport error.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<Script>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_fallback(self, response: MessageResponse) -> Self {
        self.script().fallback = Some(response);
        self
    }

    pub fn push(&self, response: MessageResponse) {
        self.script().responses.push_back(Ok(response));
    }

    /// Queue a transport failure
    pub fn push_error(&self, message: impl Into<String>) {
        self.script().responses.push_back(Err(message.into()));
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<MessageRequest> {
        self.script().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.script().requests.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse> {
        let mut script = self.script();
        script.requests.push(request.clone());

        match script.responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(RunnerError::transport(message)),
            None => script
                .fallback
                .clone()
                .ok_or_else(|| RunnerError::transport("scripted responses exhausted")),
        }
    }
}

/// A response with an explicit stop reason
pub fn response(stop_reason: &str, content: Vec<ContentBlock>) -> MessageResponse {
    MessageResponse {
        id: String::new(),
        content,
        stop_reason: Some(stop_reason.to_string()),
        usage: TokenUsage::new(10, 5),
    }
}

/// A final answer
pub fn text_response(text: &str) -> MessageResponse {
    response("end_turn", vec![ContentBlock::text(text)])
}

/// A turn requesting tools, given as `(tool_use_id, tool_name, input)`
pub fn tool_use_response(calls: Vec<(&str, &str, Value)>) -> MessageResponse {
    let content = calls
        .into_iter()
        .map(|(id, name, input)| ContentBlock::tool_use(id, name, input))
        .collect();
    response("tool_use", content)
}
