//! Agents served by this process

use agent_runner::tools::ToolRegistry;
use agent_runner::{AgentDefinition, AgentRegistry};
use chrono::Utc;
use serde_json::{json, Value};

use crate::config::ServerConfig;

fn builtin_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register_fn(
        "current_time",
        "Current date and time in UTC (RFC 3339)",
        json!({"type": "object", "properties": {}}),
        |_: Value| async move { Ok(json!(Utc::now().to_rfc3339())) },
    );
    tools
}

/// Register the default agent set
pub fn register_defaults(registry: &mut AgentRegistry, config: &ServerConfig) {
    registry.register(
        AgentDefinition::new("assistant", "Assistant")
            .with_model(config.model.clone())
            .with_max_tokens(config.max_tokens)
            .with_system_prompt(
                "You are a helpful assistant. Delegate focused research subtasks to the \
                 `researcher` agent with the handoff tool when that helps.",
            )
            .with_tools(builtin_tools())
            .delegating(),
    );

    registry.register(
        AgentDefinition::new("researcher", "Researcher")
            .with_model(config.model.clone())
            .with_max_tokens(config.max_tokens)
            .with_system_prompt(
                "You research a single well-defined question and answer with a concise summary.",
            )
            .with_tools(builtin_tools()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner::testing::ScriptedLlm;
    use agent_runner::HANDOFF_TOOL_NAME;
    use conductor_core::EventBus;
    use std::sync::Arc;

    #[test]
    fn test_defaults_use_configured_model() {
        let config = ServerConfig::from_lookup(|name| match name {
            "CONDUCTOR_MODEL" => Some("custom-model".to_string()),
            _ => None,
        })
        .unwrap();

        let mut registry = AgentRegistry::new(Arc::new(ScriptedLlm::new()), EventBus::new());
        register_defaults(&mut registry, &config);

        let agents = registry.list();
        assert_eq!(agents.len(), 2);
        assert!(agents.iter().all(|a| a.model == "custom-model"));
        assert!(registry.get("assistant").unwrap().can_delegate);
        assert!(!agents.iter().any(|a| a.tools.iter().any(|t| t == HANDOFF_TOOL_NAME)));
    }

    #[tokio::test]
    async fn test_current_time_tool() {
        let tools = builtin_tools();
        let value = tools.execute("current_time", json!({})).await.unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(value.as_str().unwrap()).is_ok());
    }
}
