//! Declarative tool metadata and the dispatch seam

use async_trait::async_trait;
use relay_core::Result;
use serde::Serialize;
use serde_json::Value;

/// Tool definition for MCP tools/list
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Receives parsed `tools/call` requests from the protocol runtime.
///
/// The runtime never interprets tool names or arguments; it routes them
/// here and wraps the outcome in a JSON-RPC response.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Declarative metadata served from `tools/list`
    fn tools(&self) -> Vec<ToolDef>;

    /// Execute one tool by name
    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value>;
}
