//! Property-based tests: error code and message consistency.

use boot_types::*;
use proptest::prelude::*;
use std::time::Duration;

fn arb_boot_error() -> impl Strategy<Value = BootError> {
    prop_oneof![
        (0u64..10_000).prop_map(|ms| BootError::ServerStartTimeout {
            after: Duration::from_millis(ms),
        }),
        (0u64..10_000).prop_map(|ms| BootError::HandlerTimeout {
            slot: "credentials provider",
            after: Duration::from_millis(ms),
        }),
        any::<String>().prop_map(BootError::InvalidRequest),
        any::<String>().prop_map(BootError::NotSupported),
        any::<String>().prop_map(BootError::Module),
        any::<String>().prop_map(BootError::Execution),
        (any::<i32>(), any::<String>()).prop_map(|(code, message)| BootError::Protocol {
            code,
            message,
            data: None,
        }),
    ]
}

proptest! {
    #[test]
    fn codes_are_snake_case(err in arb_boot_error()) {
        let code = err.code();
        prop_assert!(!code.is_empty());
        prop_assert!(code.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
    }

    #[test]
    fn only_timeouts_rewrite_their_message(err in arb_boot_error()) {
        if err.is_timeout() {
            prop_assert_ne!(err.safe_message(), err.to_string());
        } else {
            prop_assert_eq!(err.safe_message(), err.to_string());
        }
    }

    #[test]
    fn failed_envelope_round_trips(err in arb_boot_error()) {
        let envelope = ResultEnvelope::failed(&err);
        let json = serde_json::to_string(&envelope).expect("serialize");
        let back: ResultEnvelope = serde_json::from_str(&json).expect("deserialize");
        prop_assert_eq!(back, envelope);
    }
}
