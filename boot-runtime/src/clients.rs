//! Client lifecycle: one memoized loopback connection per client name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use boot_mcp::{
    ClientCapabilities, ClientSession, Lifecycle, McpClient, NotificationSink, ServerBinding,
    ServerInfo,
};
use boot_types::{Args, BootError, ClientIdentity};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::broker::Broker;

type Attempt = Shared<BoxFuture<'static, Result<Arc<Connection>, BootError>>>;

/// What to connect as.
#[derive(Clone)]
pub struct ClientOptions {
    /// Logical client identity; the name is the memoization key.
    pub identity: ClientIdentity,
    /// Capabilities advertised in the handshake.
    pub capabilities: ClientCapabilities,
    /// Receives every server notification, in arrival order.
    pub notifications: Option<NotificationSink>,
}

impl ClientOptions {
    /// Options with default capabilities and no notification sink.
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            capabilities: ClientCapabilities::default(),
            notifications: None,
        }
    }

    /// Route server notifications to `sink`.
    #[must_use]
    pub fn with_notifications(mut self, sink: NotificationSink) -> Self {
        self.notifications = Some(sink);
        self
    }
}

/// A connected client and the server binding it talks to.
pub struct Connection {
    client: McpClient,
    server: ServerBinding,
}

impl Connection {
    /// The protocol client.
    pub fn client(&self) -> &McpClient {
        &self.client
    }

    /// Metadata the server returned from the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.client.server_info()
    }

    /// The server side of the connection.
    pub fn server(&self) -> &ServerBinding {
        &self.server
    }
}

/// Creates and memoizes connections to the published server.
///
/// At most one connection attempt is ever made per client name; callers
/// asking for the same name, concurrently or later, share its outcome,
/// including a failure.
pub struct ClientManager {
    broker: Arc<Broker>,
    startup_timeout: Duration,
    handshake_timeout: Duration,
    attempts: Mutex<HashMap<String, Attempt>>,
    transports: Arc<AtomicUsize>,
}

impl ClientManager {
    /// Create a manager resolving servers from `broker`.
    pub fn new(broker: Arc<Broker>, startup_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            broker,
            startup_timeout,
            handshake_timeout,
            attempts: Mutex::new(HashMap::new()),
            transports: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the connection for `options.identity.name`, creating it on first
    /// use.
    ///
    /// # Errors
    ///
    /// [`BootError::ServerStartTimeout`] if no server was published in
    /// time, [`BootError::Module`] if a managed server fails to start, and
    /// transport or protocol errors from the handshake.
    pub async fn get_client(
        &self,
        args: &Args,
        options: ClientOptions,
    ) -> Result<Arc<Connection>, BootError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            attempts
                .entry(options.identity.name.clone())
                .or_insert_with(|| {
                    tracing::debug!(client = %options.identity.name, "starting connection attempt");
                    connect(
                        Arc::clone(&self.broker),
                        args.clone(),
                        options,
                        self.startup_timeout,
                        self.handshake_timeout,
                        Arc::clone(&self.transports),
                    )
                    .boxed()
                    .shared()
                })
                .clone()
        };
        attempt.await
    }

    /// Number of transport pairs opened so far.
    pub fn transports_opened(&self) -> usize {
        self.transports.load(Ordering::SeqCst)
    }
}

async fn connect(
    broker: Arc<Broker>,
    args: Args,
    options: ClientOptions,
    startup_timeout: Duration,
    handshake_timeout: Duration,
    transports: Arc<AtomicUsize>,
) -> Result<Arc<Connection>, BootError> {
    let server = broker
        .server()
        .get_with_timeout(startup_timeout)
        .await
        .map_err(|_| BootError::ServerStartTimeout {
            after: startup_timeout,
        })?;

    broker.set_args(args.clone());

    if server.lifecycle() == Lifecycle::Managed {
        server
            .start(&args)
            .await
            .map_err(|e| BootError::Module(format!("server failed to start: {e}")))?;
    }

    let ClientIdentity { name, version } = options.identity;
    let mut session = ClientSession::new(name, version).with_capabilities(options.capabilities);
    if let Some(sink) = options.notifications {
        session = session.with_notifications(sink);
    }

    transports.fetch_add(1, Ordering::SeqCst);
    let (client, server) = boot_mcp::connect(&server, session, handshake_timeout).await?;
    Ok(Arc::new(Connection { client, server }))
}
