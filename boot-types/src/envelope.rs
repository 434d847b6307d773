//! External request and response envelopes.
//!
//! The inbound [`ActionEnvelope`] is a closed tagged union keyed on the
//! `action` field; every sub-action is an enum too, so adding an action is
//! a compile-checked change to every `match` that dispatches on it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::BootError;
use crate::log::LogBatch;
use crate::Args;

/// Inbound request describing one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ActionEnvelope {
    /// Enumerate tools, resource templates and prompts.
    #[serde(rename = "discover")]
    Discover(DiscoverRequest),
    /// Forward a batch of raw JSON-RPC messages to the server.
    #[serde(rename = "mcp.batch", alias = "mcp.request")]
    ProtocolBatch(BatchRequest),
    /// Route an OAuth sub-action to the published credentials provider.
    #[serde(rename = "oauth")]
    OAuth(OAuthRequest),
    /// Route a callback sub-action to the published callback handler.
    #[serde(rename = "callbacks")]
    Callbacks(CallbackRequest),
}

impl ActionEnvelope {
    /// The wire name of the action, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover(_) => "discover",
            Self::ProtocolBatch(_) => "mcp.batch",
            Self::OAuth(_) => "oauth",
            Self::Callbacks(_) => "callbacks",
        }
    }
}

/// Logical identity of the protocol client a request should use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Client name; also the memoization key for connections.
    pub name: String,
    /// Client version reported during the handshake.
    #[serde(default = "default_version")]
    pub version: String,
}

impl ClientIdentity {
    /// Create an identity from a name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Payload of the `discover` action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverRequest {
    /// Client identity; a default identity is used when absent.
    pub client_info: Option<ClientIdentity>,
    /// Invocation arguments, as an object or a JSON-encoded object.
    #[serde(deserialize_with = "args_from_value")]
    pub args: Args,
}

/// Payload of the `mcp.batch` action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchRequest {
    /// Raw JSON-RPC messages; strings are parsed, objects are used as-is.
    pub messages: Vec<Value>,
    /// Client identity; a default identity is used when absent.
    pub client_info: Option<ClientIdentity>,
    /// Invocation arguments, as an object or a JSON-encoded object.
    #[serde(deserialize_with = "args_from_value")]
    pub args: Args,
}

/// OAuth sub-actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OAuthAction {
    /// Report whether OAuth is enabled and whether it has a form.
    Get,
    /// Build the authorization URL.
    AuthorizationUrl,
    /// Produce the pre-authorization form.
    AuthorizationForm,
    /// Exchange a refresh token.
    Refresh,
    /// Complete the authorization callback.
    Callback,
}

/// Payload of the `oauth` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthRequest {
    /// Which OAuth operation to run.
    pub oauth_action: OAuthAction,
    /// Operation input, passed through to the provider.
    #[serde(default)]
    pub oauth_input: Value,
}

/// Callback sub-actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackAction {
    /// Report whether callbacks are enabled and which mechanism they use.
    Get,
    /// Handle a list of inbound events.
    Handle,
    /// Install a webhook.
    Install,
    /// Poll for new events.
    Poll,
}

/// Payload of the `callbacks` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    /// Which callback operation to run.
    pub callback_action: CallbackAction,
    /// Operation input.
    #[serde(default)]
    pub callback_input: Value,
}

/// Accept invocation args either as an object or as a JSON-encoded string.
fn args_from_value<'de, D>(deserializer: D) -> Result<Args, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Args::new()),
        Value::Object(map) => Ok(map),
        Value::String(raw) if raw.trim().is_empty() => Ok(Args::new()),
        Value::String(raw) => serde_json::from_str(&raw).map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "args must be an object, got {other}"
        ))),
    }
}

/// Static server metadata plus every listed capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    /// All tools, across every page.
    pub tools: Vec<Value>,
    /// All resource templates, across every page.
    pub resource_templates: Vec<Value>,
    /// All prompts, across every page.
    pub prompts: Vec<Value>,
    /// Capabilities the server declared during the handshake.
    pub capabilities: Value,
    /// Server implementation descriptor (name, version).
    pub implementation: Value,
    /// Free-form usage instructions, if the server declared any.
    pub instructions: Option<String>,
}

/// Action-specific result payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    /// Result of `discover`.
    Discovery(Discovery),
    /// Result of `mcp.batch`.
    Responses(Vec<Value>),
    /// Result of `oauth`.
    OAuth(Value),
    /// Result of `callbacks`.
    Callbacks(Value),
}

/// Error record attached to a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    /// Stable snake_case error code.
    pub code: String,
    /// Display-safe message.
    pub message: String,
}

/// Outbound response for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    /// Whether the action completed.
    pub success: bool,
    /// JSON-RPC response records for `mcp.batch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<Value>>,
    /// Discovery payload for `discover`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Discovery>,
    /// OAuth payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<Value>,
    /// Callback payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<Value>,
    /// Output captured during the invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogBatch>,
    /// Failure detail when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl ResultEnvelope {
    /// A successful result carrying the given payload.
    pub fn ok(output: ActionOutput) -> Self {
        let mut envelope = Self {
            success: true,
            ..Self::default()
        };
        match output {
            ActionOutput::Discovery(d) => envelope.discovery = Some(d),
            ActionOutput::Responses(r) => envelope.responses = Some(r),
            ActionOutput::OAuth(v) => envelope.oauth = Some(v),
            ActionOutput::Callbacks(v) => envelope.callbacks = Some(v),
        }
        envelope
    }

    /// A failed result for the given error, using its display-safe message.
    pub fn failed(err: &BootError) -> Self {
        Self {
            success: false,
            error: Some(EnvelopeError {
                code: err.code().to_string(),
                message: err.safe_message(),
            }),
            ..Self::default()
        }
    }

    /// Attach captured output.
    #[must_use]
    pub fn with_logs(mut self, logs: Vec<LogBatch>) -> Self {
        self.logs = logs;
        self
    }
}
