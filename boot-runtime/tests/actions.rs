//! OAuth and callback actions dispatched through a boot context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boot_capture::Capture;
use boot_runtime::{
    AuthorizationUrl, BootConfig, BootContext, CallbackCapabilities, CallbackEvent,
    CallbackHandler, OAuthCapabilities, OAuthProvider, PollContext, module_fn,
};
use boot_types::{HandlerResult, ResultEnvelope};
use serde_json::{Value, json};

struct Provider {
    capabilities: OAuthCapabilities,
}

#[async_trait]
impl OAuthProvider for Provider {
    fn capabilities(&self) -> OAuthCapabilities {
        self.capabilities
    }

    async fn authorization_url(&self, input: Value) -> HandlerResult<AuthorizationUrl> {
        let state = input["state"].as_str().unwrap_or_default();
        Ok(format!("https://auth.example/authorize?state={state}").into())
    }

    async fn handle_callback(&self, input: Value) -> HandlerResult<Value> {
        match input.get("code") {
            Some(code) => Ok(json!({ "accessToken": code })),
            None => Err("missing code".into()),
        }
    }

    async fn authorization_form(&self, _input: Value) -> HandlerResult<Value> {
        Ok(json!([{ "key": "tenant", "type": "text" }]))
    }
}

struct Hooks;

#[async_trait]
impl CallbackHandler for Hooks {
    fn capabilities(&self) -> CallbackCapabilities {
        CallbackCapabilities {
            install: false,
            poll: true,
        }
    }

    async fn handle(&self, event: CallbackEvent) -> HandlerResult<Value> {
        if event.payload.is_null() {
            return Err("empty payload".into());
        }
        if event.payload == json!("boom") {
            panic!("handler choked on {}", event.event_id);
        }
        Ok(json!({ "callback": event.callback_id, "seen": event.payload }))
    }

    async fn poll(&self, context: PollContext) -> HandlerResult<Value> {
        let cursor = context.state()["cursor"].as_u64().unwrap_or(0);
        context.set_state(json!({ "cursor": cursor + 1 }));
        Ok(json!({ "event": cursor }))
    }
}

fn config() -> BootConfig {
    BootConfig {
        handler_timeout: Duration::from_millis(20),
        ..BootConfig::default()
    }
}

fn bare_context() -> BootContext {
    BootContext::new(module_fn(|_broker| async { Ok(()) }), Capture::silent(), config())
}

fn full_context(capabilities: OAuthCapabilities) -> BootContext {
    let module = module_fn(move |broker| async move {
        broker.set_credentials(Provider { capabilities });
        broker.set_callbacks(Hooks);
        Ok(())
    });
    BootContext::new(module, Capture::silent(), config())
}

fn error_code(result: &ResultEnvelope) -> Option<&str> {
    result.error.as_ref().map(|e| e.code.as_str())
}

#[tokio::test]
async fn oauth_get_without_provider_reports_disabled() {
    let ctx = bare_context();
    let result = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "get"}))
        .await;
    assert!(result.success);
    assert_eq!(result.oauth, Some(json!({"enabled": false, "hasForm": false})));
}

#[tokio::test]
async fn oauth_actions_without_provider_time_out() {
    let ctx = bare_context();
    let result = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "authorization-url"}))
        .await;
    assert!(!result.success);
    assert_eq!(error_code(&result), Some("handler_timeout"));
    assert_eq!(
        result.error.unwrap().message,
        "The OAuth provider is not available."
    );
}

#[tokio::test]
async fn oauth_sub_actions_are_shaped() {
    let ctx = full_context(OAuthCapabilities {
        form: true,
        refresh: false,
    });

    let get = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "get"}))
        .await;
    assert_eq!(get.oauth, Some(json!({"enabled": true, "hasForm": true})));

    let url = ctx
        .handle_json(json!({
            "action": "oauth",
            "oauthAction": "authorization-url",
            "oauthInput": {"state": "s1"}
        }))
        .await;
    assert_eq!(
        url.oauth,
        Some(json!({
            "authorizationUrl": "https://auth.example/authorize?state=s1",
            "codeVerifier": ""
        }))
    );

    let form = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "authorization-form"}))
        .await;
    assert_eq!(
        form.oauth,
        Some(json!({"authForm": [{"key": "tenant", "type": "text"}]}))
    );

    let callback = ctx
        .handle_json(json!({
            "action": "oauth",
            "oauthAction": "callback",
            "oauthInput": {"code": "abc"}
        }))
        .await;
    assert_eq!(callback.oauth, Some(json!({"authData": {"accessToken": "abc"}})));

    let refresh = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "refresh"}))
        .await;
    assert!(!refresh.success);
    assert_eq!(error_code(&refresh), Some("not_supported"));
}

#[tokio::test]
async fn oauth_provider_failure_is_an_execution_error() {
    let ctx = full_context(OAuthCapabilities::default());
    let result = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "callback", "oauthInput": {}}))
        .await;
    assert!(!result.success);
    assert_eq!(error_code(&result), Some("execution_error"));
    assert_eq!(result.error.as_ref().unwrap().message, "missing code");
    // The failure is logged into the envelope's own output.
    let error_lines: Vec<_> = result
        .logs
        .iter()
        .filter(|b| b.classification == boot_types::Classification::Error)
        .flat_map(|b| b.lines.iter())
        .collect();
    assert!(error_lines.iter().any(|l| l.contains("missing code")));
}

struct Explodes;

#[async_trait]
impl OAuthProvider for Explodes {
    async fn authorization_url(&self, _input: Value) -> HandlerResult<AuthorizationUrl> {
        panic!("provider exploded");
    }

    async fn handle_callback(&self, _input: Value) -> HandlerResult<Value> {
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn panicking_provider_fails_only_its_invocation() {
    let module = module_fn(|broker| async move {
        broker.set_credentials(Explodes);
        Ok(())
    });
    let ctx = BootContext::new(module, Capture::silent(), config());

    let result = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "authorization-url"}))
        .await;
    assert!(!result.success);
    assert_eq!(error_code(&result), Some("execution_error"));
    assert_eq!(
        result.error.as_ref().unwrap().message,
        "panicked: provider exploded"
    );
    let error_lines: Vec<_> = result
        .logs
        .iter()
        .filter(|b| b.classification == boot_types::Classification::Error)
        .flat_map(|b| b.lines.iter())
        .collect();
    assert!(error_lines.iter().any(|l| l.contains("provider exploded")));
    assert!(!ctx.capture().is_active());

    // The context keeps serving.
    let get = ctx
        .handle_json(json!({"action": "oauth", "oauthAction": "get"}))
        .await;
    assert!(get.success);
}

#[tokio::test]
async fn callbacks_get_reports_kind() {
    let result = bare_context()
        .handle_json(json!({"action": "callbacks", "callbackAction": "get"}))
        .await;
    assert_eq!(result.callbacks, Some(json!({"enabled": false})));

    let result = full_context(OAuthCapabilities::default())
        .handle_json(json!({"action": "callbacks", "callbackAction": "get"}))
        .await;
    assert_eq!(result.callbacks, Some(json!({"enabled": true, "type": "polling"})));
}

#[tokio::test]
async fn callback_events_fail_independently() {
    let ctx = full_context(OAuthCapabilities::default());
    let result = ctx
        .handle_json(json!({
            "action": "callbacks",
            "callbackAction": "handle",
            "callbackInput": {
                "callbackId": "cb1",
                "events": [
                    {"eventId": "e1", "payload": {"n": 1}},
                    {"eventId": "e2"},
                    {"eventId": "e3", "payload": 3},
                    {"eventId": "e4", "payload": "boom"}
                ]
            }
        }))
        .await;
    assert!(result.success);
    assert_eq!(
        result.callbacks,
        Some(json!({"results": [
            {"success": true, "eventId": "e1", "result": {"callback": "cb1", "seen": {"n": 1}}},
            {"success": false, "eventId": "e2", "error": "empty payload"},
            {"success": true, "eventId": "e3", "result": {"callback": "cb1", "seen": 3}},
            {"success": false, "eventId": "e4", "error": "panicked: handler choked on \"e4\""}
        ]}))
    );
}

#[tokio::test]
async fn poll_threads_state_through() {
    let ctx = full_context(OAuthCapabilities::default());
    let result = ctx
        .handle_json(json!({
            "action": "callbacks",
            "callbackAction": "poll",
            "callbackInput": {"callbackId": "cb1", "state": {"cursor": 4}}
        }))
        .await;
    assert_eq!(
        result.callbacks,
        Some(json!({"events": [{"event": 4}], "newState": {"cursor": 5}}))
    );
}

#[tokio::test]
async fn install_without_capability_is_not_supported() {
    let ctx = full_context(OAuthCapabilities::default());
    let result = ctx
        .handle_json(json!({"action": "callbacks", "callbackAction": "install"}))
        .await;
    assert_eq!(error_code(&result), Some("not_supported"));
}

#[tokio::test]
async fn unknown_action_is_an_invalid_request() {
    let result = bare_context()
        .handle_json(json!({"action": "teleport"}))
        .await;
    assert!(!result.success);
    assert_eq!(error_code(&result), Some("invalid_request"));
}

#[tokio::test]
async fn shared_context_handles_sequential_invocations() {
    let ctx = Arc::new(full_context(OAuthCapabilities::default()));
    for _ in 0..3 {
        let result = ctx
            .handle_json(json!({"action": "oauth", "oauthAction": "get"}))
            .await;
        assert!(result.success);
    }
    assert!(!ctx.capture().is_active());
}
