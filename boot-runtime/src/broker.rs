//! Deferred handoff of values from user code to the runtime.
//!
//! User code is loaded asynchronously and publishes what it has (a server,
//! an OAuth provider, a callback handler) whenever it gets around to it.
//! The runtime never holds a direct reference into user code; it waits on
//! the matching [`DeferredSlot`] with a deadline instead.

use std::sync::Arc;
use std::time::Duration;

use boot_mcp::PublishedServer;
use boot_types::{Args, BootError};
use tokio::sync::watch;

use crate::callbacks::CallbackHandler;
use crate::oauth::OAuthProvider;

/// A slot was not resolved before the caller's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{slot} was not published within {after:?}")]
pub struct SlotTimeout {
    /// Name of the slot.
    pub slot: &'static str,
    /// The deadline that elapsed.
    pub after: Duration,
}

impl From<SlotTimeout> for BootError {
    fn from(timeout: SlotTimeout) -> Self {
        BootError::HandlerTimeout {
            slot: timeout.slot,
            after: timeout.after,
        }
    }
}

/// A single-assignment value any number of readers can wait on.
///
/// The first [`set`](Self::set) wins; later calls are ignored. Every reader,
/// before or after resolution, observes that first value.
pub struct DeferredSlot<T> {
    name: &'static str,
    value: watch::Sender<Option<T>>,
}

impl<T: Clone> DeferredSlot<T> {
    /// Create an unresolved slot.
    pub fn new(name: &'static str) -> Self {
        let (value, _) = watch::channel(None);
        Self { name, value }
    }

    /// The slot's name, as used in timeout errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve the slot. Returns `false` if it was already resolved.
    pub fn set(&self, value: T) -> bool {
        let mut value = Some(value);
        let resolved = self.value.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        });
        if !resolved {
            tracing::debug!(slot = self.name, "ignoring second publish");
        }
        resolved
    }

    /// The value, if already resolved.
    pub fn try_get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Whether the slot has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Wait for the value for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotTimeout`] if the deadline passes first.
    pub async fn get_with_timeout(&self, timeout: Duration) -> Result<T, SlotTimeout> {
        let elapsed = SlotTimeout {
            slot: self.name,
            after: timeout,
        };
        let mut rx = self.value.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => value.clone().ok_or(elapsed),
            // The sender lives as long as `self`, so the channel cannot close.
            Ok(Err(_)) | Err(_) => Err(elapsed),
        }
    }
}

/// The four slots user code publishes into.
pub struct Broker {
    credentials: DeferredSlot<Arc<dyn OAuthProvider>>,
    args: DeferredSlot<Args>,
    server: DeferredSlot<PublishedServer>,
    callbacks: DeferredSlot<Arc<dyn CallbackHandler>>,
}

impl Broker {
    /// Create a broker with every slot unresolved.
    pub fn new() -> Self {
        Self {
            credentials: DeferredSlot::new("OAuth provider"),
            args: DeferredSlot::new("invocation arguments"),
            server: DeferredSlot::new("server instance"),
            callbacks: DeferredSlot::new("callback handler"),
        }
    }

    /// Publish the OAuth provider.
    pub fn set_credentials(&self, provider: impl OAuthProvider) -> bool {
        self.credentials.set(Arc::new(provider))
    }

    /// Publish the server instance.
    ///
    /// Use [`PublishedServer::running`] for a server that is ready as is
    /// and [`PublishedServer::managed`] for one that needs the invocation
    /// arguments to start.
    pub fn set_server(&self, server: PublishedServer) -> bool {
        self.server.set(server)
    }

    /// Publish the callback handler.
    pub fn set_callbacks(&self, handler: impl CallbackHandler) -> bool {
        self.callbacks.set(Arc::new(handler))
    }

    /// Publish the invocation arguments.
    pub fn set_args(&self, args: Args) -> bool {
        self.args.set(args)
    }

    /// Slot holding the OAuth provider.
    pub fn credentials(&self) -> &DeferredSlot<Arc<dyn OAuthProvider>> {
        &self.credentials
    }

    /// Slot holding the invocation arguments.
    pub fn args(&self) -> &DeferredSlot<Args> {
        &self.args
    }

    /// Slot holding the server instance.
    pub fn server(&self) -> &DeferredSlot<PublishedServer> {
        &self.server
    }

    /// Slot holding the callback handler.
    pub fn callbacks(&self) -> &DeferredSlot<Arc<dyn CallbackHandler>> {
        &self.callbacks
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
