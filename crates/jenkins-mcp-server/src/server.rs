//! MCP server implementation.
//!
//! The server handles the MCP protocol lifecycle:
//! 1. Initialize - exchange capabilities
//! 2. Handle tool calls - each on its own task, so a long `wait_for_build`
//!    never holds up other requests
//! 3. Shutdown - on EOF, in-flight calls are aborted and pending responses
//!    flushed

use std::io;
use std::sync::Arc;
use std::time::Duration;

use jenkins_mcp_bridge::BuildOrchestrator;
use jenkins_mcp_core::Result;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::handlers::ToolDispatcher;
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability, ToolsListResult, MCP_VERSION,
};
use crate::transport::{spawn_writer, IncomingMessage, MessageReader, MessageWriter};

/// MCP server for jenkins-mcp.
pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
    initialized: bool,
}

impl McpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            initialized: false,
        }
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    /// Run the MCP server on stdin/stdout until the client hangs up.
    pub async fn run(&mut self) -> Result<()> {
        self.serve(MessageReader::stdin(), MessageWriter::stdout())
            .await
    }

    /// Run the MCP server main loop over any line transport.
    pub async fn serve<R, W>(
        &mut self,
        mut reader: MessageReader<R>,
        writer: MessageWriter<W>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(
            "Starting MCP server with {} tools",
            self.dispatcher.available_tools().len()
        );

        let (responses, writer_task) = spawn_writer(writer);
        let mut calls = JoinSet::new();

        loop {
            while calls.try_join_next().is_some() {}

            match reader.read_message().await {
                Ok(Some(IncomingMessage::Request(req))) if req.method == "tools/call" => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let responses = responses.clone();
                    calls.spawn(async move {
                        let response = handle_tools_call(&dispatcher, req.id, req.params).await;
                        let _ = responses.send(response);
                    });
                }
                Ok(Some(msg)) => {
                    if let Some(response) = self.handle_message(msg) {
                        if responses.send(response).is_err() {
                            tracing::error!("Response writer stopped");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("EOF received, shutting down");
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    let _ = responses.send(JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::parse_error(&e.to_string()),
                    ));
                }
                Err(e) => {
                    tracing::error!("Transport error: {}", e);
                    break;
                }
            }
        }

        if !calls.is_empty() {
            tracing::info!("Aborting {} in-flight tool calls", calls.len());
        }
        calls.shutdown().await;
        drop(responses);
        let _ = writer_task.await;

        tracing::info!("MCP server stopped");
        Ok(())
    }

    /// Handle everything except `tools/call`.
    fn handle_message(&mut self, msg: IncomingMessage) -> Option<JsonRpcResponse> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req)),
            IncomingMessage::Notification(notif) => {
                self.handle_notification(&notif.method);
                None
            }
        }
    }

    fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("Handling request: {} (id: {:?})", req.method, req.id);

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id, req.params),
            "tools/list" => self.handle_tools_list(req.id),
            "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
            method => {
                tracing::warn!("Unknown method: {}", method);
                JsonRpcResponse::error(req.id, JsonRpcError::method_not_found(method))
            }
        }
    }

    fn handle_notification(&mut self, method: &str) {
        match method {
            "initialized" | "notifications/initialized" => {
                tracing::info!("Client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            _ => {
                tracing::debug!("Ignoring notification: {}", method);
            }
        }
    }

    fn handle_initialize(&mut self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        if self.initialized {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server already initialized"),
            );
        }

        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(init_params) => {
                    tracing::info!(
                        "Client: {} v{} (protocol: {})",
                        init_params.client_info.name,
                        init_params.client_info.version,
                        init_params.protocol_version
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to parse initialize params: {}", e);
                }
            }
        }

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "jenkins-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        JsonRpcResponse::from_serializable(id, &result)
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.dispatcher.available_tools(),
        };
        JsonRpcResponse::from_serializable(id, &result)
    }
}

async fn handle_tools_call(
    dispatcher: &ToolDispatcher,
    id: RequestId,
    params: Option<Value>,
) -> JsonRpcResponse {
    let params: ToolCallParams = match params {
        Some(p) => match serde_json::from_value(p) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params(&e.to_string()));
            }
        },
        None => {
            return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params"));
        }
    };

    tracing::info!("Calling tool: {}", params.name);

    let result = dispatcher.execute(&params.name, params.arguments).await;
    JsonRpcResponse::from_serializable(id, &result)
}

/// Periodically drop settled waiters, stale orphan events and expired
/// idempotency keys.
pub fn spawn_housekeeping(orchestrator: Arc<BuildOrchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = orchestrator.registry().sweep();
            orchestrator.expire_tokens();
            if removed > 0 {
                tracing::debug!(removed, "Swept correlation registry");
            }
        }
    })
}
