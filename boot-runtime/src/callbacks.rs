//! Callback (webhook / polling) handler contract and the `callbacks` action.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use boot_types::{BootError, CallbackAction, CallbackRequest, HandlerResult, panic_message};
use futures::FutureExt;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::broker::SlotTimeout;

/// How a callback handler receives its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackKind {
    /// Events are pushed to an installed webhook.
    Webhook,
    /// Events are fetched by periodic polling.
    Polling,
    /// Events are delivered by hand.
    Manual,
}

/// Optional operations a [`CallbackHandler`] implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackCapabilities {
    /// Can install a webhook.
    pub install: bool,
    /// Can poll for events.
    pub poll: bool,
}

impl CallbackCapabilities {
    /// The delivery mechanism these capabilities imply.
    ///
    /// Install wins over poll; neither means manual delivery.
    pub fn kind(&self) -> CallbackKind {
        if self.install {
            CallbackKind::Webhook
        } else if self.poll {
            CallbackKind::Polling
        } else {
            CallbackKind::Manual
        }
    }
}

/// One inbound event handed to [`CallbackHandler::handle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackEvent {
    /// Callback registration the event belongs to.
    pub callback_id: Value,
    /// Event identifier, echoed back in the result.
    pub event_id: Value,
    /// Event body.
    pub payload: Value,
}

/// Input of a poll, with a slot for the handler's updated state.
#[derive(Debug, Clone)]
pub struct PollContext {
    callback_id: Value,
    state: Value,
    new_state: Arc<Mutex<Value>>,
}

impl PollContext {
    /// Create a context starting from `state`.
    pub fn new(callback_id: Value, state: Value) -> Self {
        Self {
            callback_id,
            new_state: Arc::new(Mutex::new(state.clone())),
            state,
        }
    }

    /// Callback registration being polled.
    pub fn callback_id(&self) -> &Value {
        &self.callback_id
    }

    /// State as of the start of this poll.
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// Replace the state carried into the next poll.
    pub fn set_state(&self, state: Value) {
        *self.new_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// The state to report back: the last value set, or the original.
    pub fn current_state(&self) -> Value {
        self.new_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// User-supplied callback integration.
#[async_trait]
pub trait CallbackHandler: Send + Sync + 'static {
    /// Which optional operations this handler implements.
    fn capabilities(&self) -> CallbackCapabilities {
        CallbackCapabilities::default()
    }

    /// Process one inbound event.
    async fn handle(&self, event: CallbackEvent) -> HandlerResult<Value>;

    /// Install the webhook.
    async fn install(&self, _input: Value) -> HandlerResult<()> {
        Err("webhook installation not implemented".into())
    }

    /// Fetch new events. May return one event or a list.
    async fn poll(&self, _context: PollContext) -> HandlerResult<Value> {
        Err("polling not implemented".into())
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct HandleInput {
    callback_id: Value,
    events: Vec<EventInput>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct EventInput {
    event_id: Value,
    payload: Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PollInput {
    callback_id: Value,
    state: Value,
}

/// Run one callback sub-action against the resolved handler.
///
/// # Errors
///
/// [`BootError::HandlerTimeout`] when no handler was published in time,
/// [`BootError::NotSupported`] when the handler lacks the optional
/// operation, [`BootError::InvalidRequest`] for malformed input, and
/// [`BootError::Execution`] when install or poll fail. Failures of
/// individual events in `handle` are reported per event instead.
pub async fn run(
    handler: Result<Arc<dyn CallbackHandler>, SlotTimeout>,
    request: CallbackRequest,
) -> Result<Value, BootError> {
    let CallbackRequest {
        callback_action,
        callback_input: input,
    } = request;

    match callback_action {
        CallbackAction::Get => Ok(match handler {
            Ok(h) => json!({ "enabled": true, "type": h.capabilities().kind() }),
            Err(_) => json!({ "enabled": false }),
        }),
        CallbackAction::Handle => {
            let handler = handler?;
            let input: HandleInput = parse_input(input)?;
            let results = join_all(input.events.into_iter().map(|event| {
                let handler = Arc::clone(&handler);
                let callback_id = input.callback_id.clone();
                async move {
                    let event_id = event.event_id.clone();
                    let event = CallbackEvent {
                        callback_id,
                        event_id: event.event_id,
                        payload: event.payload,
                    };
                    // A panicking event fails alone; its siblings still report.
                    let outcome = AssertUnwindSafe(handler.handle(event))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| {
                            Err(format!("panicked: {}", panic_message(&*payload)).into())
                        });
                    match outcome {
                        Ok(result) => json!({ "success": true, "eventId": event_id, "result": result }),
                        Err(e) => {
                            tracing::warn!(event = %event_id, error = %e, "callback event failed");
                            json!({ "success": false, "eventId": event_id, "error": e.to_string() })
                        }
                    }
                }
            }))
            .await;
            Ok(json!({ "results": results }))
        }
        CallbackAction::Install => {
            let handler = handler?;
            if !handler.capabilities().install {
                return Err(BootError::NotSupported("callback installation".into()));
            }
            handler.install(input).await.map_err(BootError::execution)?;
            Ok(json!({ "success": true }))
        }
        CallbackAction::Poll => {
            let handler = handler?;
            if !handler.capabilities().poll {
                return Err(BootError::NotSupported("callback polling".into()));
            }
            let input: PollInput = parse_input(input)?;
            let context = PollContext::new(input.callback_id, input.state);
            let events = handler
                .poll(context.clone())
                .await
                .map_err(BootError::execution)?;
            Ok(json!({ "events": as_event_list(events), "newState": context.current_state() }))
        }
    }
}

/// Null becomes an empty input rather than a parse error.
fn parse_input<T: DeserializeOwned + Default>(input: Value) -> Result<T, BootError> {
    if input.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(input)?)
}

/// Normalize a poll result into a list of events.
fn as_event_list(events: Value) -> Vec<Value> {
    match events {
        Value::Array(list) => list,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_capabilities() {
        let caps = |install, poll| CallbackCapabilities { install, poll };
        assert_eq!(caps(true, true).kind(), CallbackKind::Webhook);
        assert_eq!(caps(false, true).kind(), CallbackKind::Polling);
        assert_eq!(caps(false, false).kind(), CallbackKind::Manual);
    }

    #[test]
    fn poll_results_normalize_to_lists() {
        assert_eq!(as_event_list(Value::Null), Vec::<Value>::new());
        assert_eq!(as_event_list(json!({"id": 1})), vec![json!({"id": 1})]);
        assert_eq!(as_event_list(json!([1, 2])), vec![json!(1), json!(2)]);
    }

    #[test]
    fn poll_context_tracks_latest_state() {
        let ctx = PollContext::new(json!("cb"), json!({"cursor": 1}));
        assert_eq!(ctx.current_state(), json!({"cursor": 1}));
        let handle = ctx.clone();
        handle.set_state(json!({"cursor": 2}));
        assert_eq!(ctx.state(), &json!({"cursor": 1}));
        assert_eq!(ctx.current_state(), json!({"cursor": 2}));
    }
}
