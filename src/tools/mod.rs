pub mod catalog;
pub mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ToolError;

/// External data-lookup service behind a set of named tools.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(&self, endpoint: &str, args: &Value) -> anyhow::Result<Value>;
}

/// A function the upstream model may call.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    /// Backend endpoint the call is routed to.
    pub endpoint: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    /// Function-tool entry for the upstream request.
    pub fn to_upstream(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

struct RegisteredTool {
    declaration: ToolDeclaration,
    backend: Arc<dyn ToolBackend>,
}

/// Name → backend mapping. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every declaration against one backend.
    pub fn with_backend(
        declarations: Vec<ToolDeclaration>,
        backend: Arc<dyn ToolBackend>,
    ) -> Self {
        let mut registry = Self::new();
        for declaration in declarations {
            registry.register(declaration, backend.clone());
        }
        registry
    }

    pub fn register(&mut self, declaration: ToolDeclaration, backend: Arc<dyn ToolBackend>) {
        if self.tools.contains_key(&declaration.name) {
            warn!(tool = %declaration.name, "tool registered twice, replacing");
        }
        self.tools.insert(
            declaration.name.clone(),
            RegisteredTool {
                declaration,
                backend,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn declarations(&self) -> impl Iterator<Item = &ToolDeclaration> {
        self.tools.values().map(|t| &t.declaration)
    }

    pub fn upstream_declarations(&self) -> Vec<Value> {
        self.declarations().map(ToolDeclaration::to_upstream).collect()
    }

    pub async fn dispatch(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        debug!(tool = name, endpoint = %tool.declaration.endpoint, "dispatching tool call");
        tool.backend
            .invoke(&tool.declaration.endpoint, args)
            .await
            .map_err(|e| ToolError::Execution {
                tool: name.to_string(),
                message: format!("{:#}", e),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn dispatch_routes_to_endpoint() {
        let backend = Arc::new(EchoBackend::default());
        let registry = ToolRegistry::with_backend(
            vec![declaration("get_player_stats", "player_stats")],
            backend.clone(),
        );

        let out = registry
            .dispatch("get_player_stats", &json!({"player_name": "Judge"}))
            .await
            .unwrap();
        assert_eq!(out["endpoint"], json!("player_stats"));
        assert_eq!(backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("nope", &json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("nope".to_string()));
    }

    #[tokio::test]
    async fn backend_failure_becomes_execution_error() {
        let backend = Arc::new(EchoBackend {
            failing: vec!["mlb_standings".to_string()],
            ..Default::default()
        });
        let registry = ToolRegistry::with_backend(
            vec![declaration("get_mlb_standings", "mlb_standings")],
            backend,
        );
        let err = registry
            .dispatch("get_mlb_standings", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { ref tool, ref message }
            if tool == "get_mlb_standings" && message.contains("service unavailable")));
    }

    #[test]
    fn upstream_declarations_are_function_tools() {
        let registry = ToolRegistry::with_backend(
            vec![declaration("a", "a"), declaration("b", "b")],
            Arc::new(EchoBackend::default()),
        );
        let decls = registry.upstream_declarations();
        assert_eq!(decls.len(), 2);
        assert!(decls.iter().all(|d| d["type"] == json!("function")));
    }
}
