//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PORT` (port only) and
//!    `MCP_BROWSER_LISTEN` (full socket address)
//! 2. **Config file** — path via `--config <path>`, or `mcp-browser.toml`
//!    in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! shutdown_grace_ms = 5000
//!
//! [browser]
//! headless = true
//! launch_timeout_ms = 30000
//! navigation_timeout_ms = 30000
//! screenshots_dir = "./screenshots"
//!
//! [http]
//! connect_timeout_ms = 10000
//! request_timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// WebSocket server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Grace period for in-flight connections on shutdown before the
    /// process force-exits (default 5 000 ms).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Browser engine defaults, applied when a tool call doesn't override them.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Launch Chromium headless (default true). A `headless` argument on
    /// the first browser tool call overrides this for that connection.
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Maximum wait for the browser process to come up (default 30 000 ms).
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,
    /// Default navigation timeout (default 30 000 ms). A `timeout` argument
    /// on the first browser tool call overrides this for that connection.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    /// Directory where `savePng` screenshots are written (default
    /// `./screenshots`).
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: String,
}

/// HTTP request context settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout for outbound requests (default 10 000 ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout per outbound request (default 30 000 ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    5000
}
fn default_headless() -> bool {
    true
}
fn default_launch_timeout_ms() -> u64 {
    30000
}
fn default_navigation_timeout_ms() -> u64 {
    30000
}
fn default_screenshots_dir() -> String {
    "./screenshots".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10000
}
fn default_request_timeout_ms() -> u64 {
    30000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            launch_timeout_ms: default_launch_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            screenshots_dir: default_screenshots_dir(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            browser: BrowserConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure — a config
    /// file the operator pointed at must parse). Otherwise looks for
    /// `mcp-browser.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("mcp-browser.toml").exists() {
            let content = std::fs::read_to_string("mcp-browser.toml")
                .expect("Failed to read mcp-browser.toml");
            toml::from_str(&content).expect("Failed to parse mcp-browser.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("MCP_BROWSER_LISTEN") {
            config.server.listen = listen;
        } else if let Ok(port) = std::env::var("PORT") {
            let host = config
                .server
                .listen
                .rsplit_once(':')
                .map_or_else(|| "0.0.0.0".to_string(), |(h, _)| h.to_string());
            config.server.listen = format!("{host}:{port}");
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_document_port_8080() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.shutdown_grace_ms, 5000);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.browser.headless);
        assert_eq!(config.browser.navigation_timeout_ms, 30000);
        assert_eq!(config.http.request_timeout_ms, 30000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [browser]
            headless = false
            "#,
        )
        .unwrap();
        assert!(!config.browser.headless);
        assert_eq!(config.browser.launch_timeout_ms, 30000);
        assert_eq!(config.server.listen, "0.0.0.0:8080");
    }
}
