//! OAuth provider contract and the `oauth` action.
//!
//! Token exchange is the provider's business. The runtime only routes each
//! sub-action to the provider and shapes the result.

use std::sync::Arc;

use async_trait::async_trait;
use boot_types::{BootError, HandlerResult, OAuthAction, OAuthRequest};
use serde::Serialize;
use serde_json::{Value, json};

use crate::broker::SlotTimeout;

/// Optional operations an [`OAuthProvider`] implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OAuthCapabilities {
    /// Provides a pre-authorization form.
    pub form: bool,
    /// Can refresh access tokens.
    pub refresh: bool,
}

/// Result of building an authorization URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationUrl {
    /// Where to send the user.
    pub authorization_url: String,
    /// PKCE verifier to hand back on callback; empty when unused.
    pub code_verifier: String,
}

impl AuthorizationUrl {
    /// A URL with a PKCE verifier.
    pub fn with_verifier(url: impl Into<String>, verifier: impl Into<String>) -> Self {
        Self {
            authorization_url: url.into(),
            code_verifier: verifier.into(),
        }
    }
}

impl From<String> for AuthorizationUrl {
    fn from(url: String) -> Self {
        Self::with_verifier(url, "")
    }
}

impl From<&str> for AuthorizationUrl {
    fn from(url: &str) -> Self {
        Self::with_verifier(url, "")
    }
}

/// User-supplied OAuth integration.
///
/// Optional operations are advertised through
/// [`capabilities`](Self::capabilities); their default bodies are never
/// called unless the matching flag is set.
#[async_trait]
pub trait OAuthProvider: Send + Sync + 'static {
    /// Which optional operations this provider implements.
    fn capabilities(&self) -> OAuthCapabilities {
        OAuthCapabilities::default()
    }

    /// Build the URL the user is sent to.
    async fn authorization_url(&self, input: Value) -> HandlerResult<AuthorizationUrl>;

    /// Complete the flow with the provider's callback parameters.
    async fn handle_callback(&self, input: Value) -> HandlerResult<Value>;

    /// Produce the pre-authorization form.
    async fn authorization_form(&self, _input: Value) -> HandlerResult<Value> {
        Err("authorization form not implemented".into())
    }

    /// Exchange a refresh token for new credentials.
    async fn refresh_access_token(&self, _input: Value) -> HandlerResult<Value> {
        Err("token refresh not implemented".into())
    }
}

/// Run one OAuth sub-action against the resolved provider.
///
/// `get` reports a missing provider as disabled; every other sub-action
/// needs one.
///
/// # Errors
///
/// [`BootError::HandlerTimeout`] when no provider was published in time,
/// [`BootError::NotSupported`] when the provider lacks the optional
/// operation, and [`BootError::Execution`] when the provider fails.
pub async fn run(
    provider: Result<Arc<dyn OAuthProvider>, SlotTimeout>,
    request: OAuthRequest,
) -> Result<Value, BootError> {
    let OAuthRequest {
        oauth_action,
        oauth_input: input,
    } = request;

    match oauth_action {
        OAuthAction::Get => Ok(match provider {
            Ok(p) => json!({ "enabled": true, "hasForm": p.capabilities().form }),
            Err(_) => json!({ "enabled": false, "hasForm": false }),
        }),
        OAuthAction::AuthorizationUrl => {
            let url = provider?
                .authorization_url(input)
                .await
                .map_err(BootError::execution)?;
            Ok(serde_json::to_value(url)?)
        }
        OAuthAction::AuthorizationForm => {
            let provider = provider?;
            if !provider.capabilities().form {
                return Err(BootError::NotSupported("OAuth authorization form".into()));
            }
            let form = provider
                .authorization_form(input)
                .await
                .map_err(BootError::execution)?;
            Ok(json!({ "authForm": form }))
        }
        OAuthAction::Callback => {
            let data = provider?
                .handle_callback(input)
                .await
                .map_err(BootError::execution)?;
            Ok(json!({ "authData": data }))
        }
        OAuthAction::Refresh => {
            let provider = provider?;
            if !provider.capabilities().refresh {
                return Err(BootError::NotSupported("OAuth refresh".into()));
            }
            let data = provider
                .refresh_access_token(input)
                .await
                .map_err(BootError::execution)?;
            Ok(json!({ "authData": data }))
        }
    }
}
