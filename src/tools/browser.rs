//! Browser tool handlers.
//!
//! Every handler runs against the connection's [`BrowserSession`] (already
//! ensured by the dispatcher), converts engine faults into error results,
//! and invalidates the browser context when a fault indicates the browser
//! process is gone — the next browser-requiring call then re-creates it.

use base64::Engine as _;
use serde_json::Value;
use tracing::warn;

use crate::browser::EngineError;
use crate::context::{Artifact, ToolContext};
use crate::tools::ToolResult;

pub async fn handle(name: &str, args: &Value, ctx: &ToolContext) -> ToolResult {
    match name {
        "playwright_navigate" => navigate(args, ctx).await,
        "playwright_screenshot" => screenshot(args, ctx).await,
        "playwright_click" => click(args, ctx).await,
        "playwright_fill" => fill(args, ctx).await,
        "playwright_select" => select(args, ctx).await,
        "playwright_hover" => hover(args, ctx).await,
        "playwright_evaluate" => evaluate(args, ctx).await,
        "playwright_get_visible_text" => get_visible_text(ctx).await,
        "playwright_get_visible_html" => get_visible_html(args, ctx).await,
        "playwright_press_key" => press_key(args, ctx).await,
        "playwright_custom_user_agent" => custom_user_agent(args, ctx).await,
        _ => ToolResult::error(format!("Unknown tool: {}", name)),
    }
}

/// Convert an engine fault into an error result, invalidating the browser
/// context first when the fault is fatal.
async fn engine_failure(ctx: &ToolContext, err: EngineError) -> ToolResult {
    if err.is_fatal() {
        ctx.invalidate_browser().await;
    }
    ToolResult::error(err.to_string())
}

async fn navigate(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(url) = args.get("url").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: url".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.navigate(url).await
    };
    match result {
        Ok(()) => ToolResult::text(format!("Navigated to {url}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn screenshot(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(name) = args.get("name").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: name".to_string());
    };
    let selector = args.get("selector").and_then(Value::as_str);
    let full_page = args.get("fullPage").and_then(Value::as_bool).unwrap_or(false);
    let save_png = args.get("savePng").and_then(Value::as_bool).unwrap_or(false);

    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.screenshot(selector, full_page).await
    };

    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => return engine_failure(ctx, e).await,
    };

    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    ctx.store_artifact(
        name,
        Artifact {
            data: encoded.clone(),
            mime: "image/png".to_string(),
        },
    )
    .await;

    let mut messages = vec![
        format!("Screenshot captured successfully ({} bytes)", bytes.len()),
        format!("Screenshot stored in memory with name: '{name}'"),
    ];
    if save_png {
        match save_to_disk(ctx, name, &bytes).await {
            Ok(path) => messages.push(format!("Screenshot also saved to: {path}")),
            Err(e) => {
                warn!("Failed to save screenshot: {e}");
                messages.push(format!("Failed to save screenshot to disk: {e}"));
            }
        }
    }

    ToolResult::with_content(vec![
        ToolResult::text_item(&messages.join("\n")),
        ToolResult::image_item(&encoded, "image/png", &format!("{name}.png")),
    ])
}

/// Write the PNG under the configured screenshots directory. The name is
/// sanitized so a registry name can't escape the directory.
async fn save_to_disk(ctx: &ToolContext, name: &str, bytes: &[u8]) -> Result<String, String> {
    let dir = ctx.config().browser.screenshots_dir.clone();
    let filename = format!("{}.png", sanitize_filename(name));
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| format!("create {dir}: {e}"))?;
    let path = std::path::Path::new(&dir).join(&filename);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| format!("write {}: {e}", path.display()))?;
    Ok(path.display().to_string())
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

async fn click(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(selector) = args.get("selector").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: selector".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.click(selector).await
    };
    match result {
        Ok(()) => ToolResult::text(format!("Clicked element: {selector}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn fill(args: &Value, ctx: &ToolContext) -> ToolResult {
    let (Some(selector), Some(value)) = (
        args.get("selector").and_then(Value::as_str),
        args.get("value").and_then(Value::as_str),
    ) else {
        return ToolResult::error("Missing required parameter: selector, value".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.fill(selector, value).await
    };
    match result {
        Ok(()) => ToolResult::text(format!("Filled {selector} with: {value}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn select(args: &Value, ctx: &ToolContext) -> ToolResult {
    let (Some(selector), Some(value)) = (
        args.get("selector").and_then(Value::as_str),
        args.get("value").and_then(Value::as_str),
    ) else {
        return ToolResult::error("Missing required parameter: selector, value".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.select_option(selector, value).await
    };
    match result {
        Ok(selected) => ToolResult::text(format!("Selected '{selected}' in {selector}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn hover(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(selector) = args.get("selector").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: selector".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.hover(selector).await
    };
    match result {
        Ok(()) => ToolResult::text(format!("Hovered element: {selector}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn evaluate(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(script) = args.get("script").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: script".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.evaluate(script).await
    };
    match result {
        Ok(value) => {
            let rendered =
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            ToolResult::text(format!("Execution result:\n{rendered}"))
        }
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn get_visible_text(ctx: &ToolContext) -> ToolResult {
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.visible_text().await
    };
    match result {
        Ok(text) => ToolResult::text(text),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn get_visible_html(args: &Value, ctx: &ToolContext) -> ToolResult {
    let selector = args.get("selector").and_then(Value::as_str);
    let remove_scripts = args
        .get("removeScripts")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let max_length = args
        .get("maxLength")
        .and_then(Value::as_u64)
        .unwrap_or(20000) as usize;

    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.visible_html(selector).await
    };
    match result {
        Ok(html) => {
            let html = if remove_scripts {
                strip_script_tags(&html)
            } else {
                html
            };
            ToolResult::text(crate::http::truncate_body(&html, max_length))
        }
        Err(e) => engine_failure(ctx, e).await,
    }
}

/// Remove `<script>...</script>` blocks (and any unterminated trailing
/// `<script`) from an HTML string.
fn strip_script_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = find_ci(rest, "<script") {
        out.push_str(&rest[..open]);
        match find_ci(&rest[open..], "</script>") {
            Some(close) => rest = &rest[open + close + "</script>".len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Case-insensitive substring search. The needle must be ASCII, which keeps
/// every reported offset a valid char boundary of the haystack.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

async fn press_key(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(key) = args.get("key").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: key".to_string());
    };
    let selector = args.get("selector").and_then(Value::as_str);
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.press_key(key, selector).await
    };
    match result {
        Ok(()) => ToolResult::text(format!("Pressed key: {key}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

async fn custom_user_agent(args: &Value, ctx: &ToolContext) -> ToolResult {
    let Some(user_agent) = args.get("userAgent").and_then(Value::as_str) else {
        return ToolResult::error("Missing required parameter: userAgent".to_string());
    };
    let result = {
        let slot = ctx.browser_slot().await;
        let Some(session) = slot.get() else {
            return ToolResult::error("Browser context is not running".to_string());
        };
        session.set_user_agent(user_agent).await
    };
    match result {
        Ok(()) => ToolResult::text(format!("User agent set to: {user_agent}")),
        Err(e) => engine_failure(ctx, e).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tags_are_stripped() {
        let html = "<html><head><script src=\"a.js\"></script></head>\
                    <body>ok<SCRIPT>alert(1)</SCRIPT>!</body></html>";
        assert_eq!(
            strip_script_tags(html),
            "<html><head></head><body>ok!</body></html>"
        );
    }

    #[test]
    fn html_without_scripts_is_unchanged() {
        let html = "<body><p>plain</p></body>";
        assert_eq!(strip_script_tags(html), html);
    }

    #[test]
    fn unterminated_script_is_dropped_to_end() {
        let html = "<body>visible<script>let x = 1;";
        assert_eq!(strip_script_tags(html), "<body>visible");
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("login-page_2"), "login-page_2");
        assert_eq!(sanitize_filename("../etc/passwd"), "---etc-passwd");
        assert_eq!(sanitize_filename("a b/c"), "a-b-c");
    }
}
