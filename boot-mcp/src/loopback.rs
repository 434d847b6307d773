//! In-memory duplex transport between two endpoints in the same process.
//!
//! An endpoint never runs its peer's message handler on the sender's stack:
//! [`LoopbackEndpoint::send`] pushes onto the peer's inbox and a per-endpoint
//! pump task started by [`LoopbackEndpoint::start`] delivers messages one at
//! a time, so delivery is FIFO per direction and reentrant sends cannot
//! deadlock.
//!
//! Closing either side closes both. Each endpoint's close handler runs
//! exactly once no matter how many times, or from which side, `close` is
//! called. Messages a `send` already accepted are still delivered after
//! close; the pump drains its inbox before it stops and then releases the
//! message handler.
//!
//! [`LoopbackTransport`] adapts an endpoint to rmcp's [`Transport`] so the
//! rmcp service runtime can drive it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use boot_types::TransportError;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::service::{RxJsonRpcMessage, ServiceRole, TxJsonRpcMessage};
use rmcp::transport::Transport;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::order::Sequencer;

/// Handler invoked for every delivered message.
pub type MessageHandler<M> = Arc<dyn Fn(M) + Send + Sync>;
/// Handler invoked once when the endpoint closes.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;
/// Handler invoked when a transport failure is reported.
pub type ErrorHandler = Arc<dyn Fn(TransportError) + Send + Sync>;

/// The client side of an MCP loopback pair.
pub type ClientEndpoint = LoopbackEndpoint<ClientJsonRpcMessage, ServerJsonRpcMessage>;
/// The server side of an MCP loopback pair.
pub type ServerEndpoint = LoopbackEndpoint<ServerJsonRpcMessage, ClientJsonRpcMessage>;

/// One side of a loopback transport pair, sending `Tx` and receiving `Rx`.
///
/// Cloning yields another handle to the same endpoint.
pub struct LoopbackEndpoint<Tx, Rx> {
    inner: Arc<Inner<Tx, Rx>>,
}

/// A non-owning handle to an endpoint, for use inside its own handlers.
pub struct WeakEndpoint<Tx, Rx> {
    inner: Weak<Inner<Tx, Rx>>,
}

struct Inner<Tx, Rx> {
    label: &'static str,
    closed: AtomicBool,
    shutdown: CancellationToken,
    inbox: mpsc::UnboundedSender<Rx>,
    state: Mutex<State<Tx, Rx>>,
}

struct State<Tx, Rx> {
    started: bool,
    peer: Option<Weak<Inner<Rx, Tx>>>,
    inbox_rx: Option<mpsc::UnboundedReceiver<Rx>>,
    on_message: Option<MessageHandler<Rx>>,
    on_close: Option<CloseHandler>,
    on_error: Option<ErrorHandler>,
}

impl<Tx, Rx> Inner<Tx, Rx> {
    fn state(&self) -> MutexGuard<'_, State<Tx, Rx>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark closed and run the close handler, unless already closed.
    fn shut(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.notify_closed();
    }

    fn notify_closed(&self) {
        let handler = self.state().on_close.clone();
        if let Some(handler) = handler {
            handler();
        }
        tracing::debug!(endpoint = self.label, "loopback endpoint closed");
    }

    fn deliver(&self, message: Rx) {
        let handler = self.state().on_message.clone();
        match handler {
            Some(handler) => handler(message),
            None => {
                tracing::debug!(endpoint = self.label, "dropping message, no handler installed");
            }
        }
    }
}

impl<Tx, Rx> LoopbackEndpoint<Tx, Rx>
where
    Tx: Send + 'static,
    Rx: Send + 'static,
{
    /// Create an unconnected endpoint. `label` only appears in diagnostics.
    pub fn new(label: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                label,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                inbox: tx,
                state: Mutex::new(State {
                    started: false,
                    peer: None,
                    inbox_rx: Some(rx),
                    on_message: None,
                    on_close: None,
                    on_error: None,
                }),
            }),
        }
    }

    /// Create two endpoints wired to each other.
    pub fn pair() -> (Self, LoopbackEndpoint<Rx, Tx>) {
        let left = Self::new("client");
        let right = LoopbackEndpoint::new("server");
        left.connect(&right);
        right.connect(&left);
        (left, right)
    }

    /// Point this endpoint at `peer`. Wiring is one-directional; call it on
    /// both sides (or use [`pair`](Self::pair)).
    pub fn connect(&self, peer: &LoopbackEndpoint<Rx, Tx>) {
        self.inner.state().peer = Some(Arc::downgrade(&peer.inner));
    }

    /// Install the handler for delivered messages.
    pub fn on_message(&self, handler: impl Fn(Rx) + Send + Sync + 'static) {
        self.inner.state().on_message = Some(Arc::new(handler));
    }

    /// Install the handler run once when this endpoint closes.
    pub fn on_close(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.state().on_close = Some(Arc::new(handler));
    }

    /// Install the handler for reported transport failures.
    pub fn on_error(&self, handler: impl Fn(TransportError) + Send + Sync + 'static) {
        self.inner.state().on_error = Some(Arc::new(handler));
    }

    /// Start delivering inbound messages.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyStarted`] on a second call and
    /// [`TransportError::Closed`] after close.
    pub fn start(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut rx = {
            let mut state = self.inner.state();
            if state.started {
                return Err(TransportError::AlreadyStarted);
            }
            state.started = true;
            state
                .inbox_rx
                .take()
                .ok_or(TransportError::AlreadyStarted)?
        };

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        // Refuse new sends, then hand over what was accepted.
                        rx.close();
                        while let Some(message) = rx.recv().await {
                            let Some(inner) = weak.upgrade() else { return };
                            inner.deliver(message);
                        }
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(message) => {
                            let Some(inner) = weak.upgrade() else { return };
                            inner.deliver(message);
                        }
                        None => break,
                    },
                }
            }
            if let Some(inner) = weak.upgrade() {
                inner.state().on_message = None;
            }
        });
        Ok(())
    }

    /// Queue a message for the peer.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] without a live peer,
    /// [`TransportError::Closed`] once either side has closed, and
    /// [`TransportError::NotStarted`] before [`start`](Self::start).
    pub fn send(&self, message: Tx) -> Result<(), TransportError> {
        let (started, peer) = {
            let state = self.inner.state();
            (state.started, state.peer.clone())
        };
        let peer = peer.ok_or(TransportError::NotConnected)?;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if !started {
            return Err(TransportError::NotStarted);
        }
        let peer = peer.upgrade().ok_or(TransportError::NotConnected)?;
        if peer.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        peer.inbox.send(message).map_err(|_| TransportError::Closed)
    }

    /// Close this endpoint and its peer.
    ///
    /// Marks this side closed, closes the peer (running its close handler),
    /// then runs this side's close handler. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if no peer was ever wired.
    pub fn close(&self) -> Result<(), TransportError> {
        let peer = self
            .inner
            .state()
            .peer
            .clone()
            .ok_or(TransportError::NotConnected)?;
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        if let Some(peer) = peer.upgrade() {
            peer.shut();
        }
        self.inner.notify_closed();
        Ok(())
    }

    /// Hand a failure to the error handler, if one is installed.
    pub fn report_error(&self, err: TransportError) {
        let handler = self.inner.state().on_error.clone();
        match handler {
            Some(handler) => handler(err),
            None => {
                let endpoint = self.inner.label;
                tracing::warn!(endpoint, error = %err, "unhandled transport error");
            }
        }
    }

    /// Whether [`start`](Self::start) has succeeded.
    pub fn is_started(&self) -> bool {
        self.inner.state().started
    }

    /// Whether this endpoint has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// A non-owning handle, safe to capture in this endpoint's own handlers.
    pub fn downgrade(&self) -> WeakEndpoint<Tx, Rx> {
        WeakEndpoint {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<Tx, Rx> Clone for LoopbackEndpoint<Tx, Rx> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Tx, Rx> WeakEndpoint<Tx, Rx> {
    /// Recover the endpoint if it is still alive.
    pub fn upgrade(&self) -> Option<LoopbackEndpoint<Tx, Rx>> {
        self.inner.upgrade().map(|inner| LoopbackEndpoint { inner })
    }
}

impl<Tx, Rx> Clone for WeakEndpoint<Tx, Rx> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<Tx, Rx> std::fmt::Debug for LoopbackEndpoint<Tx, Rx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("label", &self.inner.label)
            .field("started", &self.inner.state().started)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A started endpoint driven by the rmcp service runtime.
///
/// Inbound messages are queued by the endpoint's pump and handed out one at
/// a time by [`Transport::receive`], stamped with their arrival order.
/// `receive` yields `None` once the connection has closed and every
/// accepted message has been received.
pub struct LoopbackTransport<R: ServiceRole> {
    endpoint: LoopbackEndpoint<TxJsonRpcMessage<R>, RxJsonRpcMessage<R>>,
    inbound: mpsc::UnboundedReceiver<RxJsonRpcMessage<R>>,
    sequencer: Sequencer,
}

impl<R: ServiceRole> LoopbackTransport<R> {
    /// Take over `endpoint` and start it.
    ///
    /// # Errors
    ///
    /// Returns the endpoint's error if it cannot be started.
    pub fn bind(
        endpoint: LoopbackEndpoint<TxJsonRpcMessage<R>, RxJsonRpcMessage<R>>,
    ) -> Result<Self, TransportError> {
        let (tx, inbound) = mpsc::unbounded_channel();
        endpoint.on_message(move |message| {
            // The receiving service may already have stopped.
            let _ = tx.send(message);
        });
        endpoint.start()?;
        Ok(Self {
            endpoint,
            inbound,
            sequencer: Sequencer::default(),
        })
    }

    /// A handle on the arrival order of the messages this transport hands
    /// out.
    pub fn sequencer(&self) -> Sequencer {
        self.sequencer.clone()
    }

    /// The endpoint this transport drives.
    pub fn endpoint(&self) -> &LoopbackEndpoint<TxJsonRpcMessage<R>, RxJsonRpcMessage<R>> {
        &self.endpoint
    }
}

impl<R: ServiceRole> Transport<R> for LoopbackTransport<R> {
    type Error = TransportError;

    fn send(
        &mut self,
        item: TxJsonRpcMessage<R>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        // Enqueue now so messages leave in the order the service sends them.
        std::future::ready(self.endpoint.send(item))
    }

    async fn receive(&mut self) -> Option<RxJsonRpcMessage<R>> {
        let mut message = self.inbound.recv().await?;
        self.sequencer.stamp::<R>(&mut message);
        Some(message)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.endpoint.close()
    }
}
