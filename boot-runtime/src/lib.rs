#![deny(missing_docs)]
//! Invocation runtime for packaged MCP servers.
//!
//! A function package ships user code implementing [`UserModule`]. On every
//! invocation the runtime:
//!
//! 1. opens a capture session so everything the user code logs comes back
//!    in the result envelope,
//! 2. loads the module once per process; the module publishes its server
//!    (and optionally an OAuth provider and callback handler) into the
//!    [`Broker`],
//! 3. connects an in-process MCP client to the published server over a
//!    loopback transport, once per client name,
//! 4. runs the requested action and shapes the [`ResultEnvelope`].
//!
//! [`BootContext`] ties these together.
//!
//! [`ResultEnvelope`]: boot_types::ResultEnvelope

pub mod batch;
pub mod broker;
pub mod callbacks;
pub mod clients;
pub mod config;
pub mod discover;
pub mod module;
pub mod oauth;
pub mod orchestrator;

pub use batch::NotificationCollector;
pub use broker::{Broker, DeferredSlot, SlotTimeout};
pub use callbacks::{CallbackCapabilities, CallbackEvent, CallbackHandler, CallbackKind, PollContext};
pub use boot_mcp::{NotificationSink, PublishedServer};
pub use clients::{ClientManager, ClientOptions, Connection};
pub use config::BootConfig;
pub use module::{FnModule, UserModule, module_fn};
pub use oauth::{AuthorizationUrl, OAuthCapabilities, OAuthProvider};
pub use orchestrator::BootContext;

use boot_capture::Capture;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Install the process-wide tracing subscriber.
///
/// Events are printed to standard error and, while an invocation is
/// running, captured into its result envelope.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(capture: &Capture) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(capture.layer())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
}
