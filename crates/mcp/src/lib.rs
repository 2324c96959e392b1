//! MCP (Model Context Protocol) stdio client: tool discovery and invocation
//! against a server running as a child process.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use webpilot_core::Result;

pub use client::McpServer;

/// A tool advertised by the MCP server: name, human description, and a JSON
/// Schema for its arguments. Produced once at discovery and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Discovery and invocation, separated from the concrete stdio transport so
/// the layers above can be exercised against in-memory fakes.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Fetch the advertised tool list. Called once per session.
    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    /// Invoke a tool by its server-side name.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}
