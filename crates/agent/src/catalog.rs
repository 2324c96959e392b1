use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use webpilot_core::{Error, Result};
use webpilot_mcp::{McpTool, ToolTransport};

/// The frozen set of capabilities discovered at startup.
///
/// Discovery runs exactly once; the set never grows or shrinks for the
/// session's lifetime. Dispatch of a name outside the set fails without
/// ever reaching the transport, which guards against the model hallucinating
/// a tool name.
pub struct ToolCatalog {
    transport: Arc<dyn ToolTransport>,
    tools: Vec<McpTool>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub async fn build(transport: Arc<dyn ToolTransport>) -> Result<Self> {
        let tools = transport.list_tools().await?;
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name.clone(), i))
            .collect();
        debug!(count = tools.len(), "Tool catalog frozen");
        Ok(Self {
            transport,
            tools,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> &[McpTool] {
        &self.tools
    }

    /// Pure transform to the OpenAI tool-schema shape. No I/O.
    pub fn as_model_tools(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description.as_deref().unwrap_or(""),
                        "parameters": tool.input_schema
                    }
                })
            })
            .collect()
    }

    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        if !self.index.contains_key(name) {
            return Err(Error::UnknownCapability(name.to_string()));
        }
        debug!(tool = name, "Dispatching tool call");
        self.transport.call_tool(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        list_calls: AtomicUsize,
        invoke_calls: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                list_calls: AtomicUsize::new(0),
                invoke_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolTransport for FakeTransport {
        async fn list_tools(&self) -> Result<Vec<McpTool>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                McpTool {
                    name: "navigate".to_string(),
                    description: Some("Open a URL".to_string()),
                    input_schema: json!({"type": "object", "properties": {"url": {"type": "string"}}}),
                },
                McpTool {
                    name: "click".to_string(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                },
                McpTool {
                    name: "extractText".to_string(),
                    description: Some("Read text from a selector".to_string()),
                    input_schema: json!({"type": "object"}),
                },
            ])
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<Value> {
            self.invoke_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::String(format!("{} ok", name)))
        }
    }

    #[tokio::test]
    async fn test_build_calls_discovery_exactly_once() {
        let transport = Arc::new(FakeTransport::new());
        let catalog = ToolCatalog::build(transport.clone()).await.unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(transport.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_as_model_tools_shape() {
        let catalog = ToolCatalog::build(Arc::new(FakeTransport::new())).await.unwrap();
        let schemas = catalog.as_model_tools();
        assert_eq!(schemas.len(), 3);
        for schema in &schemas {
            assert_eq!(schema["type"], "function");
            assert!(schema["function"]["name"].is_string());
            assert!(schema["function"]["parameters"].is_object());
        }
        // Missing descriptions become empty strings, not nulls.
        let click = schemas
            .iter()
            .find(|s| s["function"]["name"] == "click")
            .unwrap();
        assert_eq!(click["function"]["description"], "");
    }

    #[tokio::test]
    async fn test_dispatch_known_name_reaches_transport() {
        let transport = Arc::new(FakeTransport::new());
        let catalog = ToolCatalog::build(transport.clone()).await.unwrap();
        let result = catalog
            .dispatch("navigate", json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert_eq!(result, Value::String("navigate ok".to_string()));
        assert_eq!(transport.invoke_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_name_never_reaches_transport() {
        let transport = Arc::new(FakeTransport::new());
        let catalog = ToolCatalog::build(transport.clone()).await.unwrap();
        let err = catalog.dispatch("teleport", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCapability(name) if name == "teleport"));
        assert_eq!(transport.invoke_calls.load(Ordering::SeqCst), 0);
    }
}
