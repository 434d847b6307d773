use boot_types::*;
use serde_json::json;

#[test]
fn discover_with_defaults() {
    let envelope: ActionEnvelope = serde_json::from_value(json!({"action": "discover"})).unwrap();
    match envelope {
        ActionEnvelope::Discover(req) => {
            assert!(req.client_info.is_none());
            assert!(req.args.is_empty());
        }
        other => panic!("expected discover, got {other:?}"),
    }
}

#[test]
fn batch_accepts_both_action_names() {
    for action in ["mcp.batch", "mcp.request"] {
        let envelope: ActionEnvelope = serde_json::from_value(json!({
            "action": action,
            "messages": ["{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}"],
            "clientInfo": {"name": "inspector", "version": "2.1.0"},
        }))
        .unwrap();
        let ActionEnvelope::ProtocolBatch(req) = envelope else {
            panic!("expected batch for {action}");
        };
        assert_eq!(req.messages.len(), 1);
        assert_eq!(
            req.client_info,
            Some(ClientIdentity::new("inspector", "2.1.0"))
        );
    }
}

#[test]
fn args_may_be_json_encoded() {
    let envelope: ActionEnvelope = serde_json::from_value(json!({
        "action": "discover",
        "args": "{\"token\":\"abc\"}",
    }))
    .unwrap();
    let ActionEnvelope::Discover(req) = envelope else {
        panic!("expected discover");
    };
    assert_eq!(req.args["token"], "abc");
}

#[test]
fn args_must_be_an_object() {
    let result = serde_json::from_value::<ActionEnvelope>(json!({
        "action": "discover",
        "args": [1, 2],
    }));
    assert!(result.is_err());
}

#[test]
fn client_version_defaults() {
    let identity: ClientIdentity = serde_json::from_value(json!({"name": "x"})).unwrap();
    assert_eq!(identity.version, "1.0.0");
}

#[test]
fn oauth_sub_actions_are_kebab_case() {
    let envelope: ActionEnvelope = serde_json::from_value(json!({
        "action": "oauth",
        "oauthAction": "authorization-url",
        "oauthInput": {"redirectUri": "https://example.test/cb"},
    }))
    .unwrap();
    let ActionEnvelope::OAuth(req) = envelope else {
        panic!("expected oauth");
    };
    assert_eq!(req.oauth_action, OAuthAction::AuthorizationUrl);
    assert_eq!(req.oauth_input["redirectUri"], "https://example.test/cb");
}

#[test]
fn unknown_actions_are_rejected() {
    assert!(serde_json::from_value::<ActionEnvelope>(json!({"action": "reboot"})).is_err());
    assert!(
        serde_json::from_value::<ActionEnvelope>(json!({
            "action": "callbacks",
            "callbackAction": "uninstall",
        }))
        .is_err()
    );
}

#[test]
fn ok_envelope_omits_empty_fields() {
    let envelope = ResultEnvelope::ok(ActionOutput::OAuth(json!({"enabled": false})))
        .with_logs(vec![LogBatch::new(Classification::Info, vec!["hi".into()])]);
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(
        value,
        json!({
            "success": true,
            "oauth": {"enabled": false},
            "logs": [{"classification": "info", "lines": ["hi"]}],
        })
    );
}
