//! Tool registry
//!
//! Tools are stored by name together with the JSON schema advertised to the
//! model. Registering an existing name replaces the earlier registration, so
//! tool sets from several sources can be layered onto one registry.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, RunnerError};
use crate::llm::ToolSchema;

/// Handler invoked with the raw JSON arguments chosen by the model
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> anyhow::Result<Value>;
}

/// Adapts an async closure over typed arguments into a [`ToolHandler`]
struct FnTool<A, F> {
    f: F,
    _args: PhantomData<fn(A)>,
}

#[async_trait]
impl<A, F, Fut> ToolHandler for FnTool<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, input: Value) -> anyhow::Result<Value> {
        let args: A = serde_json::from_value(input).context("invalid tool arguments")?;
        (self.f)(args).await
    }
}

#[derive(Clone)]
struct RegisteredTool {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Name-addressed catalog of tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `schema.name`, replacing any previous tool of that name
    pub fn register(&mut self, schema: ToolSchema, handler: Arc<dyn ToolHandler>) {
        if self.tools.contains_key(&schema.name) {
            debug!("Replacing tool registration: {}", schema.name);
        }
        self.tools
            .insert(schema.name.clone(), RegisteredTool { schema, handler });
    }

    /// Register an async function whose arguments are deserialized from the model's input
    pub fn register_fn<A, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        f: F,
    ) where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let schema = ToolSchema {
            name: name.into(),
            description: description.into(),
            input_schema,
        };
        self.register(
            schema,
            Arc::new(FnTool {
                f,
                _args: PhantomData,
            }),
        );
    }

    /// Layer every tool of `other` on top of this registry
    pub fn merge(&mut self, other: &ToolRegistry) {
        for tool in other.tools.values() {
            self.register(tool.schema.clone(), Arc::clone(&tool.handler));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas advertised to the model, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema.clone()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Run a tool by name. No timeout is applied here.
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self.tools.get(name).ok_or_else(|| RunnerError::ToolNotFound {
            name: name.to_string(),
        })?;

        tool.handler
            .call(input)
            .await
            .map_err(|e| RunnerError::tool_execution(name, format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn calculator() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn(
            "add",
            "Add two integers",
            json!({"type": "object", "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}}),
            |args: AddArgs| async move { Ok(json!(args.a + args.b)) },
        );
        registry
    }

    #[tokio::test]
    async fn test_execute_typed_tool() {
        let registry = calculator();
        let result = registry.execute("add", json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = calculator();
        let err = registry.execute("divide", json!({})).await.unwrap_err();
        assert!(matches!(err, RunnerError::ToolNotFound { ref name } if name == "divide"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_bad_arguments_are_tagged_with_tool_name() {
        let registry = calculator();
        let err = registry.execute("add", json!({"a": "two"})).await.unwrap_err();
        match err {
            RunnerError::ToolExecution { tool, message } => {
                assert_eq!(tool, "add");
                assert!(message.contains("invalid tool arguments"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_is_surfaced() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("fail", "Always fails", json!({}), |_: Value| async move {
            Err(anyhow::anyhow!("disk on fire"))
        });

        let err = registry.execute("fail", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = calculator();
        let mut overlay = ToolRegistry::new();
        overlay.register_fn(
            "add",
            "Add, but wrong",
            json!({}),
            |_: Value| async move { Ok(json!("overridden")) },
        );
        overlay.register_fn("noop", "Nothing", json!({}), |_: Value| async move { Ok(Value::Null) });

        registry.merge(&overlay);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["add".to_string(), "noop".to_string()]);
        assert_eq!(registry.schemas()[0].description, "Add, but wrong");
        assert_eq!(
            registry.execute("add", json!({"a": 1, "b": 1})).await.unwrap(),
            json!("overridden")
        );
    }
}
