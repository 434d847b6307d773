//! The `mcp.batch` action: forward raw JSON-RPC messages to the server.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use boot_mcp::{ErrorCode, ErrorData, McpClient, ServerNotification};
use futures::future::join_all;
use rmcp::model::{
    ClientNotification, ClientRequest, CustomNotification, CustomRequest, ServerJsonRpcMessage,
};
use serde_json::{Map, Value, json};

/// Collects server notifications pushed while a batch is in flight.
///
/// Notifications arriving while disarmed are dropped.
#[derive(Clone, Default)]
pub struct NotificationCollector {
    buffer: Arc<Mutex<Option<Vec<ServerNotification>>>>,
}

impl NotificationCollector {
    /// Create a disarmed collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting, discarding anything left from a previous batch.
    pub fn arm(&self) {
        *self.lock() = Some(Vec::new());
    }

    /// Record one notification if armed.
    pub fn push(&self, notification: ServerNotification) {
        match self.lock().as_mut() {
            Some(buffer) => buffer.push(notification),
            None => tracing::debug!("dropping notification outside a batch"),
        }
    }

    /// Stop collecting and return what arrived, as JSON-RPC notification
    /// records in arrival order.
    pub fn disarm(&self) -> Vec<Value> {
        let collected = self.lock().take().unwrap_or_default();
        collected
            .into_iter()
            .filter_map(|n| serde_json::to_value(ServerJsonRpcMessage::notification(n)).ok())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<ServerNotification>>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Send every message concurrently and collect the response records.
///
/// Records keep input order; notifications contribute none. Each message
/// fails on its own: unparsable input becomes a parse-error record with a
/// null id, and a request that times out or hits a closed transport
/// becomes an internal-error record keyed by its id.
pub async fn run_batch(client: &McpClient, messages: &[Value], timeout: Duration) -> Vec<Value> {
    join_all(messages.iter().map(|raw| process(client, raw, timeout)))
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn process(client: &McpClient, raw: &Value, timeout: Duration) -> Option<Value> {
    let message = match parse(raw) {
        Ok(message) => message,
        Err(reason) => {
            tracing::debug!(%reason, "unparsable batch message");
            let error = ErrorData::new(ErrorCode::PARSE_ERROR, reason, None);
            return Some(error_record(&Value::Null, &error));
        }
    };
    let method = message.get("method").and_then(Value::as_str);
    let params = message.get("params").cloned();

    match (message.get("id"), method) {
        (Some(id), Some(method)) => {
            let record = match client.request(typed_request(method, params), timeout).await {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(result) => response_record(id, result),
                    Err(e) => error_record(id, &ErrorData::internal_error(e.to_string(), None)),
                },
                Err(e) => error_record(id, &e.to_error_data()),
            };
            Some(record)
        }
        (Some(id), None) => {
            let error = ErrorData::new(ErrorCode::INVALID_REQUEST, "message has no method", None);
            Some(error_record(id, &error))
        }
        (None, Some(method)) => {
            if let Err(e) = client.notify(typed_notification(method, params)).await {
                tracing::warn!(method, error = %e, "notification not delivered");
            }
            None
        }
        (None, None) => {
            tracing::warn!("ignoring message with neither id nor method");
            None
        }
    }
}

/// Strings hold encoded messages; objects are messages already.
fn parse(raw: &Value) -> Result<Map<String, Value>, String> {
    let value = match raw {
        Value::String(text) => serde_json::from_str(text).map_err(|e| e.to_string())?,
        other => other.clone(),
    };
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON-RPC message object, got {other}")),
    }
}

/// The protocol request for `method`, or a custom one when the method is
/// unknown or its params do not fit.
fn typed_request(method: &str, params: Option<Value>) -> ClientRequest {
    serde_json::from_value(method_and_params(method, params.clone()))
        .unwrap_or_else(|_| ClientRequest::CustomRequest(CustomRequest::new(method, params)))
}

fn typed_notification(method: &str, params: Option<Value>) -> ClientNotification {
    serde_json::from_value(method_and_params(method, params.clone())).unwrap_or_else(|_| {
        ClientNotification::CustomNotification(CustomNotification::new(method, params))
    })
}

fn method_and_params(method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => json!({"method": method, "params": params}),
        None => json!({"method": method}),
    }
}

/// A successful JSON-RPC response record.
pub fn response_record(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// A JSON-RPC error record.
pub fn error_record(id: &Value, error: &ErrorData) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": error})
}
