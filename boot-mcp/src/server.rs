//! Publishing user servers and serving them over a loopback endpoint.
//!
//! User code writes an ordinary [`rmcp::ServerHandler`] and publishes it
//! as a [`PublishedServer`]. Each connection serves it through a
//! [`ServerSession`], which lets the rmcp runtime do the protocol work and
//! adds two things on top: notifications are handled in arrival order,
//! and a panicking handler answers with an internal error instead of
//! taking the connection down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use boot_types::{Args, HandlerResult, TransportError, panic_message};
use futures::FutureExt;
use rmcp::model::{ClientNotification, ClientRequest, ServerInfo, ServerResult};
use rmcp::service::{DynService, NotificationContext, RequestContext, RunningService};
use rmcp::{ErrorData, Peer, RoleServer, Service, ServerHandler, ServiceExt};

use crate::error::ClientError;
use crate::loopback::{LoopbackTransport, ServerEndpoint};
use crate::order::{Barrier, Turn};

/// How a server instance expects to be brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Ready to serve as soon as it is published.
    Running,
    /// Must be started with the invocation arguments before connecting.
    Managed,
}

/// A server that must be started with the invocation arguments before it
/// accepts a connection.
#[async_trait]
pub trait ManagedStart: Send + Sync + 'static {
    /// Bring the server up.
    async fn start(&self, args: &Args) -> HandlerResult<()>;
}

/// A user server as published to the runtime.
///
/// Cloning is cheap; clones serve the same instance.
#[derive(Clone)]
pub struct PublishedServer {
    service: Arc<dyn DynService<RoleServer>>,
    managed: Option<Arc<dyn ManagedStart>>,
}

impl PublishedServer {
    /// Publish a server that is ready as is.
    pub fn running(server: impl ServerHandler) -> Self {
        Self {
            service: Arc::new(server),
            managed: None,
        }
    }

    /// Publish a server that must be started before the first connection.
    pub fn managed<S>(server: S) -> Self
    where
        S: ServerHandler + ManagedStart,
    {
        let server = Arc::new(server);
        Self {
            service: Arc::clone(&server) as Arc<dyn DynService<RoleServer>>,
            managed: Some(server),
        }
    }

    /// Whether [`start`](Self::start) has any work to do.
    pub fn lifecycle(&self) -> Lifecycle {
        match self.managed {
            Some(_) => Lifecycle::Managed,
            None => Lifecycle::Running,
        }
    }

    /// The metadata the server answers `initialize` with.
    pub fn info(&self) -> ServerInfo {
        self.service.get_info()
    }

    /// Start a [`Lifecycle::Managed`] server. A no-op for running servers.
    ///
    /// # Errors
    ///
    /// Whatever the server's start reports; a panic is reported as an
    /// error too.
    pub async fn start(&self, args: &Args) -> HandlerResult<()> {
        let Some(managed) = &self.managed else {
            return Ok(());
        };
        match AssertUnwindSafe(managed.start(args)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(format!("panicked: {}", panic_message(&*payload)).into()),
        }
    }

    /// Serve this server on `endpoint` and answer the client's handshake.
    ///
    /// Resolves once the client has sent `notifications/initialized`, so
    /// it has to run alongside the client's side of the handshake.
    ///
    /// # Errors
    ///
    /// Transport errors from starting the endpoint and handshake failures.
    pub async fn serve(&self, endpoint: ServerEndpoint) -> Result<ServerBinding, ClientError> {
        let transport = LoopbackTransport::<RoleServer>::bind(endpoint.clone())?;
        let session = ServerSession {
            inner: Arc::clone(&self.service),
        };
        let service = session.serve(transport).await?;
        Ok(ServerBinding { service, endpoint })
    }
}

impl std::fmt::Debug for PublishedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedServer")
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// One connection's view of a published server.
pub struct ServerSession {
    inner: Arc<dyn DynService<RoleServer>>,
}

impl Service<RoleServer> for ServerSession {
    async fn handle_request(
        &self,
        request: ClientRequest,
        mut context: RequestContext<RoleServer>,
    ) -> Result<ServerResult, ErrorData> {
        if let Some(barrier) = context.extensions.remove::<Barrier>() {
            barrier.wait().await;
        }
        let method = request.method().to_owned();
        guarded(&method, self.inner.handle_request(request, context))
            .await
            .unwrap_or_else(|message| {
                Err(ErrorData::internal_error(
                    format!("{method} handler panicked: {message}"),
                    None,
                ))
            })
    }

    async fn handle_notification(
        &self,
        notification: ClientNotification,
        mut context: NotificationContext<RoleServer>,
    ) -> Result<(), ErrorData> {
        let turn = context.extensions.remove::<Turn>();
        if let Some(turn) = &turn {
            turn.wait().await;
        }
        let outcome = guarded(
            "notification",
            self.inner.handle_notification(notification, context),
        )
        .await;
        drop(turn);
        outcome.unwrap_or(Ok(()))
    }

    fn get_info(&self) -> ServerInfo {
        self.inner.get_info()
    }
}

/// Run a user handler, turning a panic into its message.
async fn guarded<T>(what: &str, handler: impl Future<Output = T>) -> Result<T, String> {
    AssertUnwindSafe(handler).catch_unwind().await.map_err(|payload| {
        let message = panic_message(&*payload).to_owned();
        tracing::error!(handler = what, panic = %message, "server handler panicked");
        message
    })
}

/// The running server side of a loopback connection.
pub struct ServerBinding {
    service: RunningService<RoleServer, ServerSession>,
    endpoint: ServerEndpoint,
}

impl std::fmt::Debug for ServerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBinding")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ServerBinding {
    /// Handle for pushing notifications and requests to the client.
    pub fn peer(&self) -> &Peer<RoleServer> {
        self.service.peer()
    }

    /// Close the connection from the server side.
    ///
    /// # Errors
    ///
    /// See [`LoopbackEndpoint::close`](crate::LoopbackEndpoint::close).
    pub fn close(&self) -> Result<(), TransportError> {
        self.endpoint.close()
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boot_types::HandlerError;

    struct Plain;
    impl ServerHandler for Plain {}

    struct Starts;
    impl ServerHandler for Starts {}

    #[async_trait]
    impl ManagedStart for Starts {
        async fn start(&self, args: &Args) -> HandlerResult<()> {
            match args.get("fail") {
                Some(_) => Err(HandlerError::from("refused")),
                None => Ok(()),
            }
        }
    }

    struct Explodes;
    impl ServerHandler for Explodes {}

    #[async_trait]
    impl ManagedStart for Explodes {
        async fn start(&self, _args: &Args) -> HandlerResult<()> {
            panic!("start blew up");
        }
    }

    #[tokio::test]
    async fn running_servers_skip_start() {
        let server = PublishedServer::running(Plain);
        assert_eq!(server.lifecycle(), Lifecycle::Running);
        server.start(&Args::new()).await.unwrap();
    }

    #[tokio::test]
    async fn managed_start_reports_failures() {
        let server = PublishedServer::managed(Starts);
        assert_eq!(server.lifecycle(), Lifecycle::Managed);
        server.start(&Args::new()).await.unwrap();

        let mut args = Args::new();
        args.insert("fail".into(), serde_json::json!(true));
        let err = server.start(&args).await.unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }

    #[tokio::test]
    async fn panicking_start_is_an_error() {
        let server = PublishedServer::managed(Explodes);
        let err = server.start(&Args::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "panicked: start blew up");
    }
}
