//! API tool handlers.

use serde_json::Value;

use crate::context::ToolContext;
use crate::http::{truncate_body, BODY_PREVIEW_CHARS};
use crate::tools::ToolResult;

pub async fn handle(name: &str, args: &Value, ctx: &ToolContext) -> ToolResult {
    match name {
        "playwright_http_request" => http_request(args, ctx).await,
        _ => ToolResult::error(format!("Unknown tool: {}", name)),
    }
}

/// Perform a generic HTTP request through the connection's HTTP context.
/// The response body is truncated to 1000 characters in the result.
async fn http_request(args: &Value, ctx: &ToolContext) -> ToolResult {
    let (Some(method), Some(url)) = (
        args.get("method").and_then(Value::as_str),
        args.get("url").and_then(Value::as_str),
    ) else {
        return ToolResult::error("Missing required parameter: method, url".to_string());
    };
    let data = args.get("data").and_then(Value::as_str);
    let headers = args.get("headers").and_then(Value::as_object);
    let token = args.get("token").and_then(Value::as_str);

    let result = {
        let slot = ctx.http_slot().await;
        let Some(http) = slot.get() else {
            return ToolResult::error("HTTP context is not running".to_string());
        };
        http.request(method, url, data, headers, token).await
    };

    match result {
        Ok(response) => ToolResult::with_content(vec![
            ToolResult::text_item(&format!("{} request to {url}", method.to_uppercase())),
            ToolResult::text_item(&format!(
                "Status: {} {}",
                response.status, response.status_text
            )),
            ToolResult::text_item(&format!(
                "Response: {}",
                truncate_body(&response.body, BODY_PREVIEW_CHARS)
            )),
        ]),
        Err(e) => ToolResult::error(e.to_string()),
    }
}
