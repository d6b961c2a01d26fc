pub mod event;
mod memory_store;
mod persistence;
mod repository;
mod run_model;

pub use event::{
    ApiRequestData, ApiResponseData, ErrorData, Event, EventPayload, EventType, HandoffCompleteData,
    HandoffData, IterationData, MessageData, MessageRole, RunEndData, RunStartData, ToolCallData,
    ToolCallRecord, ToolResultData,
};
pub use memory_store::MemoryStore;
pub use persistence::FileRunStore;
pub use repository::Storage;
pub use run_model::{Run, RunStatus, RunSummary, RunUpdate, TokenUsage};
