//! HTTP request context.
//!
//! [`HttpContext`] wraps `reqwest::Client` and performs the generic
//! requests behind the `playwright_http_request` tool. It is created
//! lazily by the context manager, independently of the browser context,
//! and lives for the connection.

use std::time::Duration;

use serde_json::{Map, Value};

/// Maximum response-body characters included in a tool result.
pub const BODY_PREVIEW_CHARS: usize = 1000;

/// Errors returned by [`HttpContext::request`].
#[derive(Debug)]
pub enum HttpError {
    /// The HTTP method is not one of GET/POST/PUT/PATCH/DELETE.
    UnsupportedMethod(String),
    /// The request body looked like JSON but failed to parse.
    Body(String),
    /// Transport failure (connection refused, timeout, DNS, ...).
    Request(reqwest::Error),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::UnsupportedMethod(m) => write!(f, "Unsupported HTTP method: {}", m),
            HttpError::Body(e) => write!(f, "Failed to parse request body: {}", e),
            HttpError::Request(e) => write!(f, "HTTP request failed: {}", e),
        }
    }
}

/// Status line and body of a completed request.
pub struct HttpResponseSummary {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

/// Connection-scoped HTTP client.
pub struct HttpContext {
    client: reqwest::Client,
}

impl HttpContext {
    pub fn new(config: &crate::config::HttpConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(Self { client })
    }

    /// Perform a request. `data` is sent as a JSON body when it parses as
    /// JSON, raw text otherwise; `token` becomes a Bearer Authorization
    /// header; `headers` are applied last so callers can override defaults.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        data: Option<&str>,
        headers: Option<&Map<String, Value>>,
        token: Option<&str>,
    ) -> Result<HttpResponseSummary, HttpError> {
        let method = method.to_uppercase();
        let reqwest_method = match method.as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            other => return Err(HttpError::UnsupportedMethod(other.to_string())),
        };

        let mut builder = self
            .client
            .request(reqwest_method, url)
            .header("content-type", "application/json");

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(headers) = headers {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                builder = builder.header(name.as_str(), value);
            }
        }
        if let Some(data) = data {
            builder = match parse_body(data)? {
                Some(json) => builder.json(&json),
                None => builder.body(data.to_string()),
            };
        }

        let response = builder.send().await.map_err(HttpError::Request)?;
        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();
        let body = response.text().await.unwrap_or_default();

        Ok(HttpResponseSummary {
            status: status.as_u16(),
            status_text,
            body,
        })
    }
}

/// A body that starts with `{` or `[` must be valid JSON; anything else is
/// sent as raw text.
fn parse_body(data: &str) -> Result<Option<Value>, HttpError> {
    let trimmed = data.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(data)
            .map(Some)
            .map_err(|e| HttpError::Body(e.to_string()))
    } else {
        Ok(None)
    }
}

/// Bound a body to `limit` characters, appending an ellipsis when cut.
pub fn truncate_body(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        body.to_string()
    } else {
        let cut: String = body.chars().take(limit).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_is_parsed() {
        let parsed = parse_body(r#"{"a": 1}"#).unwrap();
        assert_eq!(parsed, Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn array_body_is_parsed() {
        let parsed = parse_body("[1, 2]").unwrap();
        assert_eq!(parsed, Some(serde_json::json!([1, 2])));
    }

    #[test]
    fn invalid_json_body_is_an_error() {
        assert!(matches!(parse_body("{broken"), Err(HttpError::Body(_))));
    }

    #[test]
    fn plain_text_body_passes_through() {
        assert_eq!(parse_body("name=value").unwrap(), None);
    }

    #[test]
    fn truncation_bounds_long_bodies() {
        let long = "x".repeat(1500);
        let out = truncate_body(&long, BODY_PREVIEW_CHARS);
        assert_eq!(out.chars().count(), BODY_PREVIEW_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn truncation_leaves_short_bodies_alone() {
        assert_eq!(truncate_body("short", BODY_PREVIEW_CHARS), "short");
    }

    #[test]
    fn truncation_is_char_safe() {
        // Multi-byte characters must not be split.
        let s = "é".repeat(10);
        assert_eq!(truncate_body(&s, 5), format!("{}...", "é".repeat(5)));
    }
}
