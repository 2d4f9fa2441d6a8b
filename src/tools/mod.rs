//! Tool catalog, validation, and dispatch.
//!
//! Each tool is defined as a JSON schema (returned by [`definitions`]) and
//! handled by an async function dispatched from [`dispatch`].
//!
//! ## Tool classes
//!
//! **Browser tools** drive the Chromium session via
//! [`BrowserSession`](crate::browser::BrowserSession):
//! `playwright_navigate`, `playwright_screenshot`, `playwright_click`,
//! `playwright_fill`, `playwright_select`, `playwright_hover`,
//! `playwright_evaluate`, `playwright_get_visible_text`,
//! `playwright_get_visible_html`, `playwright_press_key`,
//! `playwright_custom_user_agent`
//!
//! **API tools** use the HTTP context via
//! [`HttpContext`](crate::http::HttpContext): `playwright_http_request`
//!
//! **Resource-free tools**: `playwright_close` (tears the browser down —
//! it must not launch one just to close it).
//!
//! The dispatcher resolves the tool name, rejects calls missing required
//! arguments before any resource is touched, lazily creates the resource
//! class the tool declares, and converts every handler fault into an error
//! result. A fault never terminates the connection.

pub mod api;
pub mod browser;

use serde_json::{json, Value};

use crate::browser::LaunchOptions;
use crate::config::Config;
use crate::context::ToolContext;

/// Tools that need the browser context.
pub const BROWSER_TOOLS: &[&str] = &[
    "playwright_navigate",
    "playwright_screenshot",
    "playwright_click",
    "playwright_fill",
    "playwright_select",
    "playwright_hover",
    "playwright_evaluate",
    "playwright_get_visible_text",
    "playwright_get_visible_html",
    "playwright_press_key",
    "playwright_custom_user_agent",
];

/// Tools that need only the HTTP context.
pub const API_TOOLS: &[&str] = &["playwright_http_request"];

/// The resource class a tool declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Browser,
    Http,
    None,
}

pub fn class_of(name: &str) -> ResourceClass {
    if BROWSER_TOOLS.contains(&name) {
        ResourceClass::Browser
    } else if API_TOOLS.contains(&name) {
        ResourceClass::Http
    } else {
        ResourceClass::None
    }
}

/// Result of a tool invocation, mapped to the MCP `tools/call` envelope.
#[derive(Debug)]
pub struct ToolResult {
    /// MCP content blocks (text items and base64 image items).
    pub content: Vec<Value>,
    /// Maps to `isError` in the MCP response.
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            content: vec![Self::text_item(&message.into())],
            is_error: false,
        }
    }

    pub fn with_content(content: Vec<Value>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            content: vec![Self::text_item(&message)],
            is_error: true,
        }
    }

    pub fn text_item(text: &str) -> Value {
        json!({ "type": "text", "text": text })
    }

    pub fn image_item(data: &str, mime: &str, filename: &str) -> Value {
        json!({
            "type": "image",
            "data": data,
            "mimeType": mime,
            "filename": filename,
        })
    }
}

/// Returns all tool definitions in catalog order.
pub fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "playwright_navigate",
            "description": "Navigate to a URL. The first browser tool call on a connection may set 'headless' and 'timeout' launch options.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "headless": { "type": "boolean" },
                    "timeout": { "type": "number" }
                },
                "required": ["url"]
            }
        }),
        json!({
            "name": "playwright_screenshot",
            "description": "Take a screenshot of the current page or a specific element. The image is stored under 'name' in the connection's screenshot registry.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "selector": { "type": "string" },
                    "fullPage": { "type": "boolean" },
                    "savePng": { "type": "boolean" }
                },
                "required": ["name"]
            }
        }),
        json!({
            "name": "playwright_click",
            "description": "Click an element on the page.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string" }
                },
                "required": ["selector"]
            }
        }),
        json!({
            "name": "playwright_fill",
            "description": "Fill out an input field.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string" },
                    "value": { "type": "string" }
                },
                "required": ["selector", "value"]
            }
        }),
        json!({
            "name": "playwright_select",
            "description": "Select an option of a <select> element by value.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string" },
                    "value": { "type": "string" }
                },
                "required": ["selector", "value"]
            }
        }),
        json!({
            "name": "playwright_hover",
            "description": "Hover an element on the page.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string" }
                },
                "required": ["selector"]
            }
        }),
        json!({
            "name": "playwright_evaluate",
            "description": "Execute JavaScript in the browser and return the JSON-serialized result.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "script": { "type": "string" }
                },
                "required": ["script"]
            }
        }),
        json!({
            "name": "playwright_get_visible_text",
            "description": "Get the visible text content of the current page.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": []
            }
        }),
        json!({
            "name": "playwright_get_visible_html",
            "description": "Get the HTML content of the current page. <script> elements are removed unless removeScripts is explicitly false.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string" },
                    "removeScripts": { "type": "boolean" },
                    "maxLength": { "type": "number" }
                },
                "required": []
            }
        }),
        json!({
            "name": "playwright_press_key",
            "description": "Press a keyboard key, optionally targeting a specific element.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "selector": { "type": "string" }
                },
                "required": ["key"]
            }
        }),
        json!({
            "name": "playwright_custom_user_agent",
            "description": "Set a custom User-Agent for the browser.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userAgent": { "type": "string" }
                },
                "required": ["userAgent"]
            }
        }),
        json!({
            "name": "playwright_close",
            "description": "Close the browser and release all resources.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": []
            }
        }),
        json!({
            "name": "playwright_http_request",
            "description": "Perform an HTTP request with a specified method (GET, POST, PUT, PATCH, DELETE).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "method": { "type": "string" },
                    "url": { "type": "string" },
                    "data": { "type": "string" },
                    "headers": { "type": "object" },
                    "token": { "type": "string" }
                },
                "required": ["method", "url"]
            }
        }),
    ]
}

fn find_tool(name: &str) -> Option<Value> {
    definitions().into_iter().find(|def| def["name"] == name)
}

/// Check required-field presence against the tool's input schema. `null`
/// counts as missing.
fn missing_required(def: &Value, args: &Value) -> Option<String> {
    let required = def["inputSchema"]["required"].as_array()?;
    for field in required {
        let field = field.as_str()?;
        if args.get(field).map_or(true, Value::is_null) {
            return Some(format!("Missing required parameter: {field}"));
        }
    }
    None
}

/// Launch options for the browser context: call arguments override the
/// configured defaults. Only honored by the call that actually launches
/// the browser (first caller wins).
fn launch_options_from(args: &Value, config: &Config) -> LaunchOptions {
    let mut opts = LaunchOptions::from_config(&config.browser);
    if let Some(headless) = args.get("headless").and_then(Value::as_bool) {
        opts.headless = headless;
    }
    if let Some(timeout) = args.get("timeout").and_then(Value::as_u64) {
        opts.navigation_timeout = std::time::Duration::from_millis(timeout);
    }
    opts
}

/// Dispatch one tool call. Never panics and never propagates a fault —
/// every failure path produces an error [`ToolResult`].
pub async fn dispatch(name: &str, args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(def) = find_tool(name) else {
        return ToolResult::error(format!("Unknown tool: {}", name));
    };

    // Validation happens before any automation context is touched.
    if let Some(message) = missing_required(&def, args) {
        return ToolResult::error(message);
    }

    match class_of(name) {
        ResourceClass::Browser => {
            let opts = launch_options_from(args, ctx.config());
            if let Err(e) = ctx.ensure_browser(opts).await {
                return ToolResult::error(e.to_string());
            }
            browser::handle(name, args, ctx).await
        }
        ResourceClass::Http => {
            if let Err(e) = ctx.ensure_http().await {
                return ToolResult::error(e.to_string());
            }
            api::handle(name, args, ctx).await
        }
        ResourceClass::None => match name {
            "playwright_close" => match ctx.close_browser().await {
                Ok(()) => ToolResult::text("Browser closed successfully"),
                Err(e) => ToolResult::error(e.to_string()),
            },
            _ => ToolResult::error(format!("Unknown tool: {}", name)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(Config::default()))
    }

    #[test]
    fn catalog_names_are_unique() {
        let defs = definitions();
        let mut names: Vec<&str> = defs.iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names.len(), defs.len());
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), defs.len());
    }

    #[test]
    fn every_classified_tool_is_in_the_catalog() {
        for name in BROWSER_TOOLS.iter().chain(API_TOOLS.iter()) {
            assert!(find_tool(name).is_some(), "{name} missing from catalog");
        }
        assert_eq!(class_of("playwright_close"), ResourceClass::None);
        assert_eq!(class_of("playwright_navigate"), ResourceClass::Browser);
        assert_eq!(class_of("playwright_http_request"), ResourceClass::Http);
    }

    #[test]
    fn required_field_presence_checks() {
        let def = find_tool("playwright_fill").unwrap();
        assert_eq!(
            missing_required(&def, &json!({ "selector": "#name" })),
            Some("Missing required parameter: value".to_string())
        );
        assert_eq!(
            missing_required(&def, &json!({ "selector": "#name", "value": null })),
            Some("Missing required parameter: value".to_string())
        );
        assert_eq!(
            missing_required(&def, &json!({ "selector": "#name", "value": "x" })),
            None
        );
    }

    #[test]
    fn launch_options_honor_call_arguments() {
        let config = Config::default();
        let opts = launch_options_from(&json!({ "headless": false, "timeout": 5000 }), &config);
        assert!(!opts.headless);
        assert_eq!(
            opts.navigation_timeout,
            std::time::Duration::from_millis(5000)
        );

        let defaults = launch_options_from(&json!({}), &config);
        assert!(defaults.headless);
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let ctx = ctx();
        let result = dispatch("bogus_tool", &json!({}), &ctx).await;
        assert!(result.is_error);
        assert_eq!(result.content[0]["text"], "Unknown tool: bogus_tool");
    }

    #[tokio::test]
    async fn validation_error_does_not_touch_the_context() {
        let ctx = ctx();
        let result = dispatch("playwright_fill", &json!({ "selector": "#user" }), &ctx).await;
        assert!(result.is_error);
        assert_eq!(
            result.content[0]["text"],
            "Missing required parameter: value"
        );
        // The browser slot was never initialized — no launch was attempted.
        assert!(!ctx.browser_slot().await.is_ready());
    }

    #[tokio::test]
    async fn close_without_a_browser_is_a_success() {
        let ctx = ctx();
        let result = dispatch("playwright_close", &json!({}), &ctx).await;
        assert!(!result.is_error);
        assert_eq!(result.content[0]["text"], "Browser closed successfully");
        assert!(!ctx.browser_slot().await.is_ready());
    }

    #[test]
    fn success_envelope_defaults_to_not_error() {
        let result = ToolResult::text("done");
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0]["type"], "text");
    }
}
