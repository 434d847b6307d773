#![deny(missing_docs)]
//! Shared types for the MCP function boot shim.
//!
//! Everything that crosses a crate boundary lives here: the external
//! request/response envelopes, the captured log batch shape, and the error
//! taxonomy used by the transport, the orchestrator and the user-facing
//! handler traits.

pub mod envelope;
pub mod error;
pub mod log;

pub use envelope::*;
pub use error::*;
pub use log::*;

/// Raw invocation arguments handed to user code.
pub type Args = serde_json::Map<String, serde_json::Value>;
