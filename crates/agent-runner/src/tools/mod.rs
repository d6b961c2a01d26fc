//! Tools agents can invoke mid-conversation

mod registry;

pub use registry::{ToolHandler, ToolRegistry};
