//! MCP (Model Context Protocol) JSON-RPC session.
//!
//! One session per WebSocket connection. The session loop pulls
//! [`TransportEvent`]s off the adapter, handles JSON-RPC 2.0 requests, and
//! writes responses back through the adapter. Processing is strictly one
//! message at a time: a second call arriving while one is in flight waits
//! in the event channel, which is what keeps handler invocations for a
//! connection serialized.
//!
//! ## Supported methods
//!
//! | Method              | Description                                 |
//! |---------------------|---------------------------------------------|
//! | `initialize`        | Handshake, returns capabilities             |
//! | `tools/list`        | List the tool catalog                       |
//! | `tools/call`        | Dispatch a tool and return its result       |
//! | `resources/list`    | List stored screenshots                     |
//! | `resources/read`    | Read a stored screenshot as a base64 blob   |
//! | `ping`              | Liveness check                              |
//!
//! Notifications (`notifications/initialized`, `notifications/cancelled`)
//! are acknowledged silently. When the connection ends — or the server is
//! shutting down — the session disposes the connection's automation
//! contexts exactly once before returning.

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::context::ToolContext;
use crate::tools;
use crate::transport::{TransportEvent, WsTransport};

const SERVER_NAME: &str = "mcp-browser";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Run one connection's session until the transport closes or the server
/// shuts down.
pub async fn run_session(
    conn_id: &str,
    transport: WsTransport,
    mut events: mpsc::Receiver<TransportEvent>,
    ctx: ToolContext,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = transport.start() {
        warn!("Session {conn_id} could not start: {e}");
        ctx.dispose_all().await;
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Message(message)) => {
                    if let Some(response) = handle_message(&message, &ctx).await {
                        if let Err(e) = transport.send(&response).await {
                            warn!("Failed to send response on {conn_id}: {e}");
                        }
                    }
                }
                Some(TransportEvent::Error(e)) => {
                    warn!("Transport error on {conn_id}: {e}");
                }
                Some(TransportEvent::Closed) | None => break,
            },
            changed = shutdown.changed() => {
                // A dropped sender means the supervisor is gone — treat it
                // like a shutdown rather than spinning on the error.
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Closing {conn_id} for shutdown");
                    let _ = transport.close().await;
                    break;
                }
            }
        }
    }

    // Teardown runs exactly once, also when a call was in flight when the
    // peer went away.
    ctx.dispose_all().await;
    info!("Client disconnected: {conn_id}");
}

/// Handle one inbound JSON-RPC message. Returns `None` for notifications
/// (no `id`), which get no response.
pub async fn handle_message(message: &Value, ctx: &ToolContext) -> Option<Value> {
    let id = message.get("id").cloned();
    let method = message.get("method").and_then(Value::as_str).unwrap_or("");

    let Some(id) = id else {
        match method {
            "notifications/initialized" | "notifications/cancelled" => {}
            _ => debug!("Ignoring unknown notification: {method}"),
        }
        return None;
    };

    let response = match method {
        "initialize" => handle_initialize(),
        "ping" => json!({ "jsonrpc": "2.0", "result": {} }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "result": { "tools": tools::definitions() }
        }),
        "tools/call" => handle_tools_call(message, ctx).await,
        "resources/list" => handle_resources_list(ctx).await,
        "resources/read" => handle_resources_read(message, ctx).await,
        _ => json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32601,
                "message": format!("Method not found: {}", method)
            }
        }),
    };

    Some(inject_id(response, id))
}

/// Handle `initialize` — protocol version, capabilities, and server info.
fn handle_initialize() -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            }
        }
    })
}

/// Handle `tools/call` — dispatch to the tool layer and wrap its result.
async fn handle_tools_call(message: &Value, ctx: &ToolContext) -> Value {
    let params = message.get("params").cloned().unwrap_or(json!({}));
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = tools::dispatch(name, &args, ctx).await;

    json!({
        "jsonrpc": "2.0",
        "result": {
            "content": result.content,
            "isError": result.is_error
        }
    })
}

/// Handle `resources/list` — the connection's stored screenshots.
async fn handle_resources_list(ctx: &ToolContext) -> Value {
    let resources: Vec<Value> = ctx
        .artifact_names()
        .await
        .into_iter()
        .map(|name| {
            json!({
                "uri": format!("screenshot://{name}"),
                "name": name,
                "mimeType": "image/png"
            })
        })
        .collect();

    json!({
        "jsonrpc": "2.0",
        "result": { "resources": resources }
    })
}

/// Handle `resources/read` — return a stored screenshot as a base64 blob.
async fn handle_resources_read(message: &Value, ctx: &ToolContext) -> Value {
    let uri = message
        .get("params")
        .and_then(|p| p.get("uri"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let artifact = match uri.strip_prefix("screenshot://") {
        Some(name) => ctx.artifact(name).await,
        None => None,
    };

    match artifact {
        Some(artifact) => json!({
            "jsonrpc": "2.0",
            "result": {
                "contents": [{
                    "uri": uri,
                    "mimeType": artifact.mime,
                    "blob": artifact.data
                }]
            }
        }),
        None => json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32002,
                "message": format!("Resource not found: {}", uri)
            }
        }),
    }
}

/// Inject the request `id` into a response object.
fn inject_id(mut response: Value, id: Value) -> Value {
    response["id"] = id;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Artifact;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let response = handle_message(
            &json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
            &ctx(),
        )
        .await
        .unwrap();

        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "mcp-browser");
        assert!(response["result"]["capabilities"]["tools"].is_object());
        assert!(response["result"]["capabilities"]["resources"].is_object());
    }

    #[tokio::test]
    async fn ping_returns_empty_result() {
        let response = handle_message(
            &json!({ "jsonrpc": "2.0", "id": "p1", "method": "ping" }),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(response["id"], "p1");
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let response = handle_message(
            &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            &ctx(),
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let response = handle_message(
            &json!({ "jsonrpc": "2.0", "id": 7, "method": "does/not/exist" }),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn tools_list_matches_the_catalog() {
        let response = handle_message(
            &json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
            &ctx(),
        )
        .await
        .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), tools::definitions().len());
        assert!(tools.iter().any(|t| t["name"] == "playwright_navigate"));
    }

    #[tokio::test]
    async fn unknown_tool_call_is_an_error_result() {
        let response = handle_message(
            &json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "nope", "arguments": {} }
            }),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "Unknown tool: nope"
        );
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_touching_the_context() {
        let ctx = ctx();
        let response = handle_message(
            &json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {
                    "name": "playwright_fill",
                    "arguments": { "selector": "#user" }
                }
            }),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "Missing required parameter: value"
        );
        assert!(!ctx.browser_slot().await.is_ready());
    }

    #[tokio::test]
    async fn successful_results_carry_is_error_false() {
        let response = handle_message(
            &json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/call",
                "params": { "name": "playwright_close", "arguments": {} }
            }),
            &ctx(),
        )
        .await
        .unwrap();
        assert_eq!(response["result"]["isError"], false);
    }

    #[tokio::test]
    async fn stored_screenshots_are_readable_resources() {
        let ctx = ctx();
        ctx.store_artifact(
            "home",
            Artifact {
                data: "cGF5bG9hZA==".into(),
                mime: "image/png".into(),
            },
        )
        .await;

        let listing = handle_message(
            &json!({ "jsonrpc": "2.0", "id": 8, "method": "resources/list" }),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(
            listing["result"]["resources"][0]["uri"],
            "screenshot://home"
        );

        let read = handle_message(
            &json!({
                "jsonrpc": "2.0",
                "id": 9,
                "method": "resources/read",
                "params": { "uri": "screenshot://home" }
            }),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(read["result"]["contents"][0]["blob"], "cGF5bG9hZA==");

        let missing = handle_message(
            &json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "resources/read",
                "params": { "uri": "screenshot://nope" }
            }),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(missing["error"]["code"], -32002);
    }
}
