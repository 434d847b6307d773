//! MCP client bound to one loopback endpoint.
//!
//! [`McpClient`] is a running rmcp client service. Request correlation,
//! the `initialize` handshake and pagination are the runtime's; this module
//! adds per-request timeouts, ordered delivery of server notifications to a
//! [`NotificationSink`], and refuses server-initiated requests other than
//! `ping`.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{
    ClientCapabilities, ClientInfo, ClientNotification, ClientRequest, ClientResult, ErrorCode,
    Implementation, Prompt, ProtocolVersion, ResourceTemplate, ServerInfo, ServerNotification,
    ServerRequest, ServerResult, Tool,
};
use rmcp::service::{NotificationContext, PeerRequestOptions, RequestContext, RunningService};
use rmcp::{ErrorData, Peer, RoleClient, Service, ServiceError, ServiceExt};

use crate::error::ClientError;
use crate::loopback::{ClientEndpoint, LoopbackTransport};
use crate::order::{Barrier, Sequencer, Turn};

/// Receives every notification the server pushes, in arrival order.
pub type NotificationSink = Arc<dyn Fn(ServerNotification) + Send + Sync>;

/// The client half of a connection before it is bound to an endpoint.
pub struct ClientSession {
    info: ClientInfo,
    sink: Option<NotificationSink>,
}

impl ClientSession {
    /// A session announcing itself as `name`/`version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ClientInfo {
                meta: None,
                protocol_version: ProtocolVersion::LATEST,
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: name.into(),
                    version: version.into(),
                    ..Default::default()
                },
            },
            sink: None,
        }
    }

    /// Replace the capability set advertised during the handshake.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    /// Deliver server notifications to `sink`.
    #[must_use]
    pub fn with_notifications(mut self, sink: NotificationSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The identity sent during the handshake.
    pub fn identity(&self) -> &Implementation {
        &self.info.client_info
    }

    /// Bind to `endpoint`, start it, and perform the `initialize` handshake.
    ///
    /// The server side must be serving concurrently for this to resolve.
    ///
    /// # Errors
    ///
    /// Transport errors from starting the endpoint and handshake failures.
    pub async fn connect(self, endpoint: ClientEndpoint) -> Result<McpClient, ClientError> {
        let transport = LoopbackTransport::<RoleClient>::bind(endpoint.clone())?;
        let sequencer = transport.sequencer();
        let service = self.serve(transport).await?;
        if let Some(info) = service.peer_info() {
            tracing::debug!(
                client = %service.service().info.client_info.name,
                server = %info.server_info.name,
                "client connected"
            );
        }
        Ok(McpClient {
            service,
            sequencer,
            endpoint,
        })
    }
}

impl Service<RoleClient> for ClientSession {
    async fn handle_request(
        &self,
        request: ServerRequest,
        mut context: RequestContext<RoleClient>,
    ) -> Result<ClientResult, ErrorData> {
        if let Some(barrier) = context.extensions.remove::<Barrier>() {
            barrier.wait().await;
        }
        match request {
            ServerRequest::PingRequest(_) => Ok(ClientResult::empty(())),
            ServerRequest::CustomRequest(custom) => Err(method_not_found(&custom.method)),
            other => {
                let method = serde_json::to_value(&other)
                    .ok()
                    .and_then(|v| v.get("method").and_then(|m| m.as_str()).map(str::to_owned))
                    .unwrap_or_default();
                Err(method_not_found(&method))
            }
        }
    }

    async fn handle_notification(
        &self,
        notification: ServerNotification,
        mut context: NotificationContext<RoleClient>,
    ) -> Result<(), ErrorData> {
        let turn = context.extensions.remove::<Turn>();
        if let Some(turn) = &turn {
            turn.wait().await;
        }
        match &self.sink {
            Some(sink) => sink(notification),
            None => tracing::debug!("dropping server notification, no sink installed"),
        }
        Ok(())
    }

    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

fn method_not_found(method: &str) -> ErrorData {
    ErrorData::new(
        ErrorCode::METHOD_NOT_FOUND,
        format!("method not found: {method}"),
        None,
    )
}

/// A connected protocol client.
pub struct McpClient {
    service: RunningService<RoleClient, ClientSession>,
    sequencer: Sequencer,
    endpoint: ClientEndpoint,
}

impl McpClient {
    /// The identity sent during the handshake.
    pub fn identity(&self) -> &Implementation {
        self.service.service().identity()
    }

    /// Server metadata negotiated during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.service.peer_info()
    }

    /// The underlying rmcp peer.
    pub fn peer(&self) -> &Peer<RoleClient> {
        self.service.peer()
    }

    /// Send a request and wait for its response.
    ///
    /// Every notification the server pushed before answering has reached
    /// the sink by the time this returns.
    ///
    /// # Errors
    ///
    /// [`ClientError::Protocol`] when the server answers with an error,
    /// [`ClientError::Timeout`] when nothing arrives in time, and
    /// [`ClientError::Transport`] when the connection is gone.
    pub async fn request(
        &self,
        request: ClientRequest,
        timeout: Duration,
    ) -> Result<ServerResult, ClientError> {
        let options = PeerRequestOptions {
            timeout: Some(timeout),
            meta: None,
        };
        let handle = self
            .service
            .send_request_with_option(request, options)
            .await?;
        let response = handle.await_response().await;
        self.sequencer.settled().await;
        Ok(response?)
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] once the connection is gone.
    pub async fn notify(&self, notification: ClientNotification) -> Result<(), ClientError> {
        self.service
            .send_notification(notification)
            .await
            .map_err(ClientError::from)
    }

    /// Every tool the server lists, across all pages.
    ///
    /// # Errors
    ///
    /// Fails on the first page that fails, or when the whole walk takes
    /// longer than `timeout`.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<Tool>, ClientError> {
        within(timeout, self.service.list_all_tools()).await
    }

    /// Every resource template the server lists, across all pages.
    ///
    /// # Errors
    ///
    /// See [`list_tools`](Self::list_tools).
    pub async fn list_resource_templates(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ResourceTemplate>, ClientError> {
        within(timeout, self.service.list_all_resource_templates()).await
    }

    /// Every prompt the server lists, across all pages.
    ///
    /// # Errors
    ///
    /// See [`list_tools`](Self::list_tools).
    pub async fn list_prompts(&self, timeout: Duration) -> Result<Vec<Prompt>, ClientError> {
        within(timeout, self.service.list_all_prompts()).await
    }

    /// Close the connection, failing any outstanding requests.
    ///
    /// # Errors
    ///
    /// See [`LoopbackEndpoint::close`](crate::LoopbackEndpoint::close).
    pub fn close(&self) -> Result<(), ClientError> {
        self.endpoint.close().map_err(ClientError::from)
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let identity = self.identity();
        f.debug_struct("McpClient")
            .field("name", &identity.name)
            .field("version", &identity.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn within<T>(
    timeout: Duration,
    walk: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ClientError> {
    match tokio::time::timeout(timeout, walk).await {
        Ok(outcome) => outcome.map_err(ClientError::from),
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}
