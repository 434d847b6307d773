#![deny(missing_docs)]
//! In-process MCP client and server joined by a loopback transport.
//!
//! The protocol itself is rmcp's; this crate supplies what an in-process
//! pairing needs around it:
//!
//! - [`LoopbackEndpoint`] is one side of an in-memory duplex channel.
//!   Endpoints are created in pairs, deliver messages asynchronously in FIFO
//!   order, and close together. [`LoopbackTransport`] lets the rmcp service
//!   runtime drive one.
//! - [`PublishedServer`] wraps a user [`rmcp::ServerHandler`], optionally
//!   with a [`ManagedStart`] step, and serves it per connection.
//! - [`McpClient`] is the connected client, with per-request timeouts and
//!   server notifications delivered in order to a [`NotificationSink`].
//! - [`connect`] runs both sides of the handshake over a fresh pair.

pub mod client;
pub mod connection;
pub mod error;
pub mod loopback;
pub mod order;
pub mod server;

pub use client::{ClientSession, McpClient, NotificationSink};
pub use connection::connect;
pub use error::ClientError;
pub use loopback::{
    ClientEndpoint, LoopbackEndpoint, LoopbackTransport, ServerEndpoint, WeakEndpoint,
};
pub use order::Sequencer;
pub use server::{Lifecycle, ManagedStart, PublishedServer, ServerBinding, ServerSession};

pub use rmcp::{ErrorData, RoleClient, RoleServer, ServerHandler};
pub use rmcp::model::{
    ClientCapabilities, ErrorCode, Implementation, ProtocolVersion, ServerCapabilities,
    ServerInfo, ServerNotification,
};
