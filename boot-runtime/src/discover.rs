//! The `discover` action.

use std::time::Duration;

use boot_mcp::{ClientError, McpClient};
use boot_types::Discovery;
use serde::Serialize;
use serde_json::Value;

/// List tools, resource templates and prompts, plus server metadata.
///
/// The three listings run concurrently. A listing that fails is reported
/// as empty; the server simply does not support that class.
pub async fn discover(client: &McpClient, timeout: Duration) -> Discovery {
    let (tools, resource_templates, prompts) = tokio::join!(
        client.list_tools(timeout),
        client.list_resource_templates(timeout),
        client.list_prompts(timeout),
    );

    let (capabilities, implementation, instructions) = match client.server_info() {
        Some(info) => (
            serde_json::to_value(&info.capabilities).unwrap_or(Value::Null),
            serde_json::to_value(&info.server_info).unwrap_or(Value::Null),
            info.instructions.clone(),
        ),
        None => (Value::Null, Value::Null, None),
    };

    Discovery {
        tools: or_unsupported("tools", tools),
        resource_templates: or_unsupported("resource templates", resource_templates),
        prompts: or_unsupported("prompts", prompts),
        capabilities,
        implementation,
        instructions,
    }
}

fn or_unsupported<T: Serialize>(class: &str, listing: Result<Vec<T>, ClientError>) -> Vec<Value> {
    let items = listing.unwrap_or_else(|e| {
        tracing::warn!(class, error = %e, "listing failed, treating as unsupported");
        Vec::new()
    });
    items
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}
