//! Browser engine wrapper.
//!
//! [`BrowserSession`] owns one Chromium process and one page, driven over
//! the Chrome DevTools Protocol via `chromiumoxide`. One session belongs to
//! exactly one connection; it is created lazily by the context manager and
//! torn down by the close tool or connection teardown.
//!
//! All faults are mapped to [`EngineError`]. A fault that indicates the CDP
//! connection (and therefore the browser process) is gone is classified as
//! [`EngineError::Disconnected`] so the context manager can invalidate the
//! session and re-create it on the next call. Everything else is a per-call
//! failure that leaves the session usable.

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded wait for an element to appear before selector-based actions.
const SELECTOR_WAIT: Duration = Duration::from_millis(5000);

/// Options applied when launching the browser. The first browser-requiring
/// call on a connection decides these for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub launch_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl LaunchOptions {
    pub fn from_config(config: &crate::config::BrowserConfig) -> Self {
        Self {
            headless: config.headless,
            launch_timeout: Duration::from_millis(config.launch_timeout_ms),
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
        }
    }
}

/// Errors returned by [`BrowserSession`] operations.
#[derive(Debug)]
pub enum EngineError {
    /// The browser process could not be started.
    Launch(String),
    /// A bounded wait expired. The session remains usable.
    Timeout(String),
    /// The CDP connection is gone — the session must be re-created.
    Disconnected(String),
    /// A per-call command failure (element not found, JS exception, ...).
    Command(String),
}

impl EngineError {
    /// `true` when the underlying browser is dead and the context manager
    /// should transition the resource back to uninitialized.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Disconnected(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Launch(msg) => write!(f, "Failed to launch browser: {}", msg),
            EngineError::Timeout(msg) => write!(f, "{}", msg),
            EngineError::Disconnected(msg) => write!(f, "Browser connection lost: {}", msg),
            EngineError::Command(msg) => write!(f, "{}", msg),
        }
    }
}

/// CDP transport failures surface as websocket/channel errors; anything
/// else is a per-call command failure.
fn is_disconnect_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("websocket")
        || lower.contains("channel closed")
        || lower.contains("connection closed")
        || lower.contains("browser closed")
}

fn classify(op: &str, err: &CdpError) -> EngineError {
    let text = err.to_string();
    if is_disconnect_message(&text) {
        EngineError::Disconnected(format!("{op}: {text}"))
    } else {
        EngineError::Command(format!("{op}: {text}"))
    }
}

/// Quote a string as a JS literal for embedding in an evaluated snippet.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// One live Chromium process + page, owned by one connection.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    headless: bool,
    navigation_timeout: Duration,
}

impl BrowserSession {
    /// Launch a Chromium instance and open a blank page.
    pub async fn launch(opts: &LaunchOptions) -> Result<Self, EngineError> {
        info!(headless = opts.headless, "Launching browser");

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .window_size(1280, 720);
        if !opts.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(EngineError::Launch)?;

        let (browser, mut handler) =
            match tokio::time::timeout(opts.launch_timeout, Browser::launch(config)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(EngineError::Launch(e.to_string())),
                Err(_) => {
                    return Err(EngineError::Timeout(format!(
                        "Browser launch timed out after {}ms",
                        opts.launch_timeout.as_millis()
                    )))
                }
            };

        // Drive the CDP message loop until the browser goes away.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("CDP handler loop ended");
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(EngineError::Launch(format!("Failed to open page: {e}")));
            }
        };

        Ok(Self {
            browser,
            page,
            handler_task,
            headless: opts.headless,
            navigation_timeout: opts.navigation_timeout,
        })
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    /// Navigate to `url` and wait for the load to settle, bounded by the
    /// session's navigation timeout.
    pub async fn navigate(&self, url: &str) -> Result<(), EngineError> {
        let fut = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), CdpError>(())
        };
        match tokio::time::timeout(self.navigation_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(classify("navigate", &e)),
            Err(_) => Err(EngineError::Timeout(format!(
                "Navigation to {url} timed out after {}ms",
                self.navigation_timeout.as_millis()
            ))),
        }
    }

    /// Poll for an element until it appears or the wait expires.
    pub async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let start = tokio::time::Instant::now();
        loop {
            match self.page.find_element(selector).await {
                Ok(_) => return Ok(()),
                Err(e) if is_disconnect_message(&e.to_string()) => {
                    return Err(classify("wait_for_selector", &e));
                }
                Err(_) => {
                    if start.elapsed() >= timeout {
                        return Err(EngineError::Timeout(format!(
                            "Timed out after {}ms waiting for selector: {selector}",
                            timeout.as_millis()
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    pub async fn click(&self, selector: &str) -> Result<(), EngineError> {
        self.wait_for_selector(selector, SELECTOR_WAIT).await?;
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| classify("click", &e))?;
        element.click().await.map_err(|e| classify("click", &e))?;
        Ok(())
    }

    /// Clear the field, then type the value keystroke by keystroke.
    pub async fn fill(&self, selector: &str, value: &str) -> Result<(), EngineError> {
        self.wait_for_selector(selector, SELECTOR_WAIT).await?;
        let clear = format!(
            "(() => {{ const el = document.querySelector({sel}); if (el) {{ el.value = \"\"; }} }})()",
            sel = js_string(selector)
        );
        self.page
            .evaluate(clear)
            .await
            .map_err(|e| classify("fill", &e))?;
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| classify("fill", &e))?;
        element.click().await.map_err(|e| classify("fill", &e))?;
        element
            .type_str(value)
            .await
            .map_err(|e| classify("fill", &e))?;
        Ok(())
    }

    /// Select an option of a `<select>` element by value. Returns the value
    /// the element reports after the change.
    pub async fn select_option(&self, selector: &str, value: &str) -> Result<String, EngineError> {
        self.wait_for_selector(selector, SELECTOR_WAIT).await?;
        let script = format!(
            "(() => {{ \
                const el = document.querySelector({sel}); \
                if (!el) return null; \
                el.value = {val}; \
                el.dispatchEvent(new Event(\"input\", {{ bubbles: true }})); \
                el.dispatchEvent(new Event(\"change\", {{ bubbles: true }})); \
                return el.value; \
            }})()",
            sel = js_string(selector),
            val = js_string(value)
        );
        match self.evaluate(&script).await? {
            Value::String(selected) => Ok(selected),
            _ => Err(EngineError::Command(format!(
                "Element not found: {selector}"
            ))),
        }
    }

    pub async fn hover(&self, selector: &str) -> Result<(), EngineError> {
        self.wait_for_selector(selector, SELECTOR_WAIT).await?;
        let script = format!(
            "(() => {{ \
                const el = document.querySelector({sel}); \
                if (!el) return false; \
                el.scrollIntoView({{ block: \"center\" }}); \
                el.dispatchEvent(new MouseEvent(\"mouseover\", {{ bubbles: true }})); \
                el.dispatchEvent(new MouseEvent(\"mouseenter\", {{ bubbles: true }})); \
                return true; \
            }})()",
            sel = js_string(selector)
        );
        match self.evaluate(&script).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(EngineError::Command(format!(
                "Element not found: {selector}"
            ))),
        }
    }

    /// Run a script in the page and return its JSON-serializable result.
    pub async fn evaluate(&self, script: &str) -> Result<Value, EngineError> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .map_err(|e| classify("evaluate", &e))?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    /// Capture a PNG of the page, or of a single element when `selector`
    /// is given.
    pub async fn screenshot(
        &self,
        selector: Option<&str>,
        full_page: bool,
    ) -> Result<Vec<u8>, EngineError> {
        match selector {
            Some(sel) => {
                let element = self
                    .page
                    .find_element(sel)
                    .await
                    .map_err(|_| EngineError::Command(format!("Element not found: {sel}")))?;
                element
                    .screenshot(CaptureScreenshotFormat::Png)
                    .await
                    .map_err(|e| classify("screenshot", &e))
            }
            None => self
                .page
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .full_page(full_page)
                        .build(),
                )
                .await
                .map_err(|e| classify("screenshot", &e)),
        }
    }

    /// The page body's rendered text.
    pub async fn visible_text(&self) -> Result<String, EngineError> {
        match self
            .evaluate("document.body ? document.body.innerText : \"\"")
            .await?
        {
            Value::String(text) => Ok(text),
            _ => Ok(String::new()),
        }
    }

    /// The document's HTML, or a single element's outer HTML when
    /// `selector` is given.
    pub async fn visible_html(&self, selector: Option<&str>) -> Result<String, EngineError> {
        match selector {
            Some(sel) => {
                let script = format!(
                    "(() => {{ const el = document.querySelector({sel}); return el ? el.outerHTML : null; }})()",
                    sel = js_string(sel)
                );
                match self.evaluate(&script).await? {
                    Value::String(html) => Ok(html),
                    _ => Err(EngineError::Command(format!("Element not found: {sel}"))),
                }
            }
            None => self
                .page
                .content()
                .await
                .map_err(|e| classify("get_visible_html", &e)),
        }
    }

    /// Press a key as real input events, optionally focusing an element
    /// first.
    pub async fn press_key(&self, key: &str, selector: Option<&str>) -> Result<(), EngineError> {
        if let Some(sel) = selector {
            self.wait_for_selector(sel, SELECTOR_WAIT).await?;
            let focus = format!(
                "(() => {{ const el = document.querySelector({sel}); if (el) {{ el.focus(); }} }})()",
                sel = js_string(sel)
            );
            self.page
                .evaluate(focus)
                .await
                .map_err(|e| classify("press_key", &e))?;
        }
        for event_type in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .key(key.to_string())
                .text(key.to_string())
                .r#type(event_type)
                .build()
                .map_err(EngineError::Command)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| classify("press_key", &e))?;
        }
        Ok(())
    }

    /// Override the browser's User-Agent for subsequent requests on this
    /// page.
    pub async fn set_user_agent(&self, user_agent: &str) -> Result<(), EngineError> {
        let params = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent)
            .build()
            .map_err(EngineError::Command)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| classify("set_user_agent", &e))?;
        Ok(())
    }

    /// Shut down the browser process and stop the CDP handler task.
    pub async fn close(mut self) -> Result<(), EngineError> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| classify("close", &e));
        if let Err(ref e) = result {
            warn!("Browser close reported: {e}");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        result
    }

    /// Drop the session without the closing handshake — used when the CDP
    /// connection is already dead and `close` would only time out.
    pub fn discard(self) {
        self.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_quotes_and_escapes() {
        assert_eq!(js_string("#login"), "\"#login\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(js_string("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn disconnect_classification() {
        assert!(is_disconnect_message("WebSocket protocol error"));
        assert!(is_disconnect_message("the channel closed unexpectedly"));
        assert!(is_disconnect_message("Connection closed by remote"));
        assert!(!is_disconnect_message("Node with given id not found"));
        assert!(!is_disconnect_message("JavaScript exception: boom"));
    }

    #[test]
    fn fatal_only_for_disconnects() {
        assert!(EngineError::Disconnected("gone".into()).is_fatal());
        assert!(!EngineError::Timeout("slow".into()).is_fatal());
        assert!(!EngineError::Command("no element".into()).is_fatal());
        assert!(!EngineError::Launch("no chrome".into()).is_fatal());
    }

    #[test]
    fn launch_options_follow_config() {
        let config = crate::config::BrowserConfig::default();
        let opts = LaunchOptions::from_config(&config);
        assert!(opts.headless);
        assert_eq!(opts.navigation_timeout, Duration::from_millis(30000));
        assert_eq!(opts.launch_timeout, Duration::from_millis(30000));
    }
}
