//! # relay-server
//!
//! MCP protocol runtime for the relay. The runtime speaks JSON-RPC over any
//! `Transport`: the axum WebSocket surface in production, stdio for local
//! development, channel-backed fakes in tests.

pub mod http;
pub mod mcp;
pub mod secrets;
pub mod ssh;
pub mod tools;

pub use tools::{ToolDef, ToolDispatcher};

use relay_core::{Request, RequestId, Response, Result, error_codes};
use relay_transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Server identity reported from `initialize`
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "mcp-relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// MCP protocol runtime bound to one tool dispatcher
pub struct McpServer {
    dispatcher: Arc<dyn ToolDispatcher>,
    info: ServerInfo,
}

enum Event {
    Message(Value),
    Closed,
}

impl McpServer {
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            info: ServerInfo::default(),
        }
    }

    pub fn with_info(mut self, info: ServerInfo) -> Self {
        self.info = info;
        self
    }

    /// Serve requests over the transport until the peer disconnects.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> Result<()> {
        // Inbound events funnel into one loop so responses go out in
        // arrival order
        let (tx, mut rx) = mpsc::unbounded_channel();
        let message_tx = tx.clone();
        transport.on_message(Box::new(move |message| {
            let _ = message_tx.send(Event::Message(message.clone()));
        }));
        let close_tx = tx;
        transport.on_close(Box::new(move || {
            let _ = close_tx.send(Event::Closed);
        }));
        transport.on_error(Box::new(|e| warn!("Transport error: {e}")));
        transport.start().await?;

        while let Some(event) = rx.recv().await {
            match event {
                Event::Message(message) => {
                    let request: Request = match serde_json::from_value(message) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("Failed to parse request: {e}");
                            continue;
                        }
                    };
                    let Some(id) = request.id.clone() else {
                        self.handle_notification(&request);
                        continue;
                    };
                    let response = self.handle_request(id, &request).await;
                    let value = serde_json::to_value(&response)?;
                    if let Err(e) = transport.send(&value).await {
                        warn!("Failed to send response: {e}");
                        break;
                    }
                }
                Event::Closed => {
                    debug!("Peer disconnected");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_notification(&self, request: &Request) {
        match request.method.as_str() {
            "initialized" => debug!("Client initialization complete"),
            other => debug!("Ignoring notification: {other}"),
        }
    }

    async fn handle_request(&self, id: RequestId, request: &Request) -> Response {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request).await,
            other => Response::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }

    fn handle_initialize(&self, id: RequestId, request: &Request) -> Response {
        let _params: mcp::InitializeParams = match serde_json::from_value(request.params.clone())
        {
            Ok(p) => p,
            Err(e) => {
                return Response::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid initialize params: {e}"),
                );
            }
        };

        let result = mcp::InitializeResult {
            protocol_version: mcp::PROTOCOL_VERSION.to_string(),
            capabilities: mcp::ServerCapabilities {
                tools: mcp::ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: mcp::ServerInfoPayload {
                name: self.info.name.clone(),
                version: self.info.version.clone(),
            },
        };
        match serde_json::to_value(result) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    fn handle_tools_list(&self, id: RequestId) -> Response {
        let tools = self.dispatcher.tools();
        Response::success(id, serde_json::json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: RequestId, request: &Request) -> Response {
        #[derive(serde::Deserialize)]
        struct ToolCallParams {
            name: String,
            #[serde(default)]
            arguments: Value,
        }

        let params: ToolCallParams = match serde_json::from_value(request.params.clone()) {
            Ok(p) => p,
            Err(e) => {
                return Response::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tool call params: {e}"),
                );
            }
        };

        match self.dispatcher.dispatch(&params.name, params.arguments).await {
            Ok(result) => Response::success(
                id,
                serde_json::json!({
                    "content": [{ "type": "text", "text": result.to_string() }]
                }),
            ),
            Err(e) => Response::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }
}
