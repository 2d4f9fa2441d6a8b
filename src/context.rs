//! Per-connection automation context manager.
//!
//! [`ToolContext`] owns the lazily-created automation resources for one
//! connection: the browser session, the HTTP request context, and the
//! artifact registry of stored screenshots. No two connections share any
//! of this state.
//!
//! Each resource class moves through an explicit state machine:
//!
//! ```text
//! Uninitialized ──ensure──▶ Ready ──close──▶ Closing ──▶ Uninitialized
//!                             │ ensure (reuse)
//!                             ▼
//!                           Ready
//! ```
//!
//! A close never skips `Closing`; re-creation after a close starts from a
//! fresh `Uninitialized` slot. Creation failures leave the slot
//! `Uninitialized`, so the next call that needs the resource retries and
//! reports the failure verbatim again.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::browser::{BrowserSession, LaunchOptions};
use crate::config::Config;
use crate::http::HttpContext;

/// Automation resource failed to initialize or died mid-use. Recoverable
/// at the call level; the next call that needs the resource retries.
#[derive(Debug)]
pub struct ContextError(String);

impl ContextError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one lazily-created resource.
#[derive(Debug)]
pub enum ResourceState<T> {
    Uninitialized,
    Ready(T),
    Closing,
}

impl<T> ResourceState<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            ResourceState::Ready(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ResourceState::Ready(_))
    }

    /// `Ready → Closing`, handing the resource to the caller for teardown.
    /// Any other state is left unchanged and yields nothing.
    pub fn begin_close(&mut self) -> Option<T> {
        if self.is_ready() {
            if let ResourceState::Ready(resource) = std::mem::replace(self, ResourceState::Closing)
            {
                return Some(resource);
            }
        }
        None
    }

    /// `Closing → Uninitialized` (also normalizes a stray `Uninitialized`).
    pub fn finish_close(&mut self) {
        *self = ResourceState::Uninitialized;
    }

    pub fn set_ready(&mut self, resource: T) {
        *self = ResourceState::Ready(resource);
    }
}

/// A stored screenshot payload, keyed by name in the artifact registry.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Base64-encoded image bytes.
    pub data: String,
    pub mime: String,
}

/// Per-connection execution context shared by all tool handlers.
pub struct ToolContext {
    config: Arc<Config>,
    browser: Mutex<ResourceState<BrowserSession>>,
    http: Mutex<ResourceState<HttpContext>>,
    artifacts: Mutex<HashMap<String, Artifact>>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            browser: Mutex::new(ResourceState::Uninitialized),
            http: Mutex::new(ResourceState::Uninitialized),
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Launch the browser if this connection doesn't have one yet.
    ///
    /// When a browser is already running, the supplied options are NOT
    /// re-applied — the first caller's options hold for the lifetime of
    /// the connection. Launch failure leaves the slot uninitialized so the
    /// next browser-requiring call retries.
    pub async fn ensure_browser(&self, opts: LaunchOptions) -> Result<(), ContextError> {
        let mut slot = self.browser.lock().await;
        match &*slot {
            ResourceState::Ready(session) => {
                if session.headless() != opts.headless {
                    debug!(
                        "Browser already running; ignoring launch options from this call \
                         (first caller's options win)"
                    );
                }
                Ok(())
            }
            ResourceState::Closing => Err(ContextError::new("Browser context is closing")),
            ResourceState::Uninitialized => {
                let session = BrowserSession::launch(&opts)
                    .await
                    .map_err(|e| ContextError::new(e.to_string()))?;
                slot.set_ready(session);
                Ok(())
            }
        }
    }

    /// Create the HTTP request context if this connection doesn't have one
    /// yet. Independent of the browser context; the two may coexist.
    pub async fn ensure_http(&self) -> Result<(), ContextError> {
        let mut slot = self.http.lock().await;
        match &*slot {
            ResourceState::Ready(_) => Ok(()),
            ResourceState::Closing => Err(ContextError::new("HTTP context is closing")),
            ResourceState::Uninitialized => {
                let context = HttpContext::new(&self.config.http).map_err(ContextError::new)?;
                slot.set_ready(context);
                Ok(())
            }
        }
    }

    /// Lock the browser slot for the duration of one operation.
    pub async fn browser_slot(&self) -> MutexGuard<'_, ResourceState<BrowserSession>> {
        self.browser.lock().await
    }

    /// Lock the HTTP slot for the duration of one operation.
    pub async fn http_slot(&self) -> MutexGuard<'_, ResourceState<HttpContext>> {
        self.http.lock().await
    }

    /// Explicit browser teardown (the close tool, or connection teardown).
    /// Idempotent; the slot always ends `Uninitialized` so a later
    /// `ensure_browser` starts fresh.
    pub async fn close_browser(&self) -> Result<(), ContextError> {
        let mut slot = self.browser.lock().await;
        match slot.begin_close() {
            Some(session) => {
                let result = session.close().await;
                slot.finish_close();
                result.map_err(|e| ContextError::new(format!("Browser close failed: {e}")))
            }
            None => {
                slot.finish_close();
                Ok(())
            }
        }
    }

    /// Drop a dead browser session without the closing handshake, so the
    /// next browser-requiring call re-creates it.
    pub async fn invalidate_browser(&self) {
        let mut slot = self.browser.lock().await;
        if let Some(session) = slot.begin_close() {
            session.discard();
            warn!("Browser context invalidated after fatal engine error");
        }
        slot.finish_close();
    }

    /// Connection teardown: close whichever contexts exist. Teardown
    /// faults are logged, never propagated — one resource's failed
    /// teardown must not block another's.
    pub async fn dispose_all(&self) {
        if let Err(e) = self.close_browser().await {
            warn!("Browser teardown failed: {e}");
        }
        let mut http = self.http.lock().await;
        http.begin_close();
        http.finish_close();
    }

    /// Store a screenshot payload under `name`. Names are unique; last
    /// write wins.
    pub async fn store_artifact(&self, name: &str, artifact: Artifact) {
        self.artifacts
            .lock()
            .await
            .insert(name.to_string(), artifact);
    }

    pub async fn artifact(&self, name: &str) -> Option<Artifact> {
        self.artifacts.lock().await.get(name).cloned()
    }

    pub async fn artifact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_reaches_ready() {
        let mut state: ResourceState<&str> = ResourceState::Uninitialized;
        assert!(!state.is_ready());
        assert!(state.get().is_none());

        state.set_ready("resource");
        assert!(state.is_ready());
        assert_eq!(state.get(), Some(&"resource"));
    }

    #[test]
    fn close_passes_through_closing() {
        let mut state: ResourceState<&str> = ResourceState::Ready("resource");
        let taken = state.begin_close();
        assert_eq!(taken, Some("resource"));
        assert!(matches!(state, ResourceState::Closing));

        state.finish_close();
        assert!(matches!(state, ResourceState::Uninitialized));
    }

    #[test]
    fn begin_close_is_idempotent() {
        let mut state: ResourceState<&str> = ResourceState::Uninitialized;
        assert!(state.begin_close().is_none());
        assert!(matches!(state, ResourceState::Uninitialized));

        state.set_ready("resource");
        assert!(state.begin_close().is_some());
        // Second close while Closing yields nothing and stays Closing.
        assert!(state.begin_close().is_none());
        assert!(matches!(state, ResourceState::Closing));
    }

    #[test]
    fn reuse_keeps_the_same_resource() {
        // Ready → Ready is the reuse path: ensure-like access returns the
        // identical underlying resource both times.
        let mut state: ResourceState<String> = ResourceState::Uninitialized;
        state.set_ready("first".to_string());
        let first = state.get().map(|s| str::as_ptr(s));
        let second = state.get().map(|s| str::as_ptr(s));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn artifact_round_trip() {
        let ctx = ToolContext::new(Arc::new(Config::default()));
        ctx.store_artifact(
            "login-page",
            Artifact {
                data: "aGVsbG8=".into(),
                mime: "image/png".into(),
            },
        )
        .await;

        let stored = ctx.artifact("login-page").await.unwrap();
        assert_eq!(stored.data, "aGVsbG8=");
        assert_eq!(stored.mime, "image/png");
        assert!(ctx.artifact("missing").await.is_none());
    }

    #[tokio::test]
    async fn artifact_last_write_wins() {
        let ctx = ToolContext::new(Arc::new(Config::default()));
        for data in ["Zmlyc3Q=", "c2Vjb25k"] {
            ctx.store_artifact(
                "page",
                Artifact {
                    data: data.into(),
                    mime: "image/png".into(),
                },
            )
            .await;
        }
        assert_eq!(ctx.artifact("page").await.unwrap().data, "c2Vjb25k");
        assert_eq!(ctx.artifact_names().await, vec!["page".to_string()]);
    }

    #[tokio::test]
    async fn ensure_http_is_idempotent() {
        let ctx = ToolContext::new(Arc::new(Config::default()));
        ctx.ensure_http().await.unwrap();
        ctx.ensure_http().await.unwrap();
        assert!(ctx.http_slot().await.is_ready());
    }

    #[tokio::test]
    async fn dispose_all_clears_http_state() {
        let ctx = ToolContext::new(Arc::new(Config::default()));
        ctx.ensure_http().await.unwrap();
        ctx.dispose_all().await;
        assert!(!ctx.http_slot().await.is_ready());

        // Disposing twice is harmless (Scenario: teardown races connection
        // close).
        ctx.dispose_all().await;
        assert!(!ctx.http_slot().await.is_ready());
    }
}
