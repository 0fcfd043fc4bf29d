//! MCP front end: an `rmcp` [`ServerHandler`] over the [`LocalRegistry`].
//!
//! The server is also the scheduler's [`Transport`]: the handshake completes
//! once the client's `notifications/initialized` arrives.  A closed session
//! is reported to the registry as a far-side disconnect.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo,
};
use rmcp::service::{NotificationContext, QuitReason, RequestContext, ServerInitializeError};
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tooltree_registry::{LocalRegistry, RegistryError, RegistryEventPayload, Transport};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client did not complete initialization: {0}")]
    Initialize(#[from] ServerInitializeError),

    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Serves the registry's live tools to one MCP client.
#[derive(Clone)]
pub struct ToolTreeServer {
    registry: Arc<LocalRegistry>,
    name: String,
    version: String,
    initialized: Arc<watch::Sender<bool>>,
}

impl ToolTreeServer {
    pub fn new(
        registry: Arc<LocalRegistry>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let (initialized, _) = watch::channel(false);
        Self {
            registry,
            name: name.into(),
            version: version.into(),
            initialized: Arc::new(initialized),
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Run one session over `input`/`output` until the client goes away.
    ///
    /// Registry list changes are forwarded as
    /// `notifications/tools/list_changed` for the lifetime of the session.
    pub async fn run_session<R, W>(self, input: R, output: W) -> Result<QuitReason, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let initialized = Arc::clone(&self.initialized);
        let mut events = registry.bus().subscribe();

        let running = match self.serve((input, output)).await {
            Ok(running) => running,
            Err(e) => {
                registry.disconnect();
                return Err(e.into());
            }
        };

        let peer = running.peer().clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.payload != RegistryEventPayload::ToolListChanged {
                    continue;
                }
                if let Err(e) = peer.notify_tool_list_changed().await {
                    warn!(error = %e, "failed to announce tool list change");
                    break;
                }
            }
        });

        let quit = running.waiting().await;
        forwarder.abort();
        initialized.send_replace(false);
        registry.disconnect();

        let quit = quit?;
        info!(?quit, "client session ended");
        Ok(quit)
    }

    fn call(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.registry.call(name, arguments).map_err(|e| match e {
            RegistryError::UnknownTool(_) => McpError::invalid_params(e.to_string(), None),
            other => McpError::internal_error(other.to_string(), None),
        })
    }
}

impl ServerHandler for ToolTreeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Implementation::default()
            },
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.registry.list()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!(tool = %request.name, "tools/call");
        let arguments = Value::Object(request.arguments.unwrap_or_default());
        self.call(&request.name, arguments)
    }

    async fn on_initialized(&self, _context: NotificationContext<RoleServer>) {
        info!("client initialized");
        self.initialized.send_replace(true);
    }
}

#[async_trait]
impl Transport for ToolTreeServer {
    async fn handshake(&self) -> Result<(), RegistryError> {
        let mut ready = self.initialized.subscribe();
        ready
            .wait_for(|initialized| *initialized)
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::Handshake(e.to_string()))
    }
}
