//! Turns a request into an [`Outcome`]: either through a registered action
//! handler or a generic HTTP call.
//!
//! The dispatcher never fails. Non-2xx statuses and transport faults are
//! captured in the outcome, and 2xx responses are passed through a soft-error
//! detector before being reported as successful.

pub mod handlers;
pub mod outcome;
pub mod shaping;
pub mod soft_error;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use handlers::{ActionHandler, ActionParams};
pub use outcome::{ErrorCode, Outcome};
pub use soft_error::{MarkupErrorDetector, SoftErrorDetector};

use crate::credentials::CredentialTemplate;

use outcome::codes;

/// A request ready to execute: credentials already substituted.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

pub struct Dispatcher {
    client: Client,
    handlers: Vec<Arc<dyn ActionHandler>>,
    detector: Arc<dyn SoftErrorDetector>,
    credentials: Arc<CredentialTemplate>,
}

impl Dispatcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            handlers: Vec::new(),
            detector: Arc::new(MarkupErrorDetector),
            credentials: Arc::new(CredentialTemplate::new(Vec::new())),
        }
    }

    /// Secrets to mask in transport error messages.
    pub fn with_credentials(mut self, credentials: Arc<CredentialTemplate>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn SoftErrorDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn handler_for(&self, url: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.iter().find(|h| h.matches(url))
    }

    /// Execute `request`. `request_id` is only used for logging.
    pub async fn dispatch(&self, request_id: &str, request: DispatchRequest) -> Outcome {
        if let Some(handler) = self.handler_for(&request.url) {
            debug!(request_id, handler = handler.name(), "delegating to action handler");
            let params = ActionParams {
                url: request.url,
                method: request.method,
                headers: request.headers,
                body: request.body,
            };
            let outcome = handler.execute(request_id, &params).await;
            let detector = handler
                .soft_error_detector()
                .unwrap_or(self.detector.as_ref());
            return classify(outcome, detector);
        }

        let outcome = self.execute_http(request_id, request).await;
        classify(outcome, self.detector.as_ref())
    }

    async fn execute_http(&self, request_id: &str, request: DispatchRequest) -> Outcome {
        let DispatchRequest {
            mut url,
            method,
            mut headers,
            body,
            timeout,
        } = request;

        if shaping::shape_form_request(&mut url, &mut headers) {
            debug!(request_id, "form relay, browser headers applied");
        }

        let method = match Method::from_bytes(method.to_uppercase().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return Outcome::transport_failure(
                    format!("Invalid HTTP method: {method}"),
                    codes::INVALID_REQUEST,
                );
            }
        };

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .timeout(timeout)
            .headers(header_map(&headers));

        if method != Method::GET {
            if let Some(body) = body.filter(|b| !b.is_empty()) {
                builder = builder.body(body);
            }
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return self.transport_failure(request_id, "request failed", e),
        };

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let response_headers = flatten_headers(response.headers());

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return self.transport_failure(request_id, "reading response body failed", e),
        };

        info!(request_id, status = status.as_u16(), bytes = text.len(), "upstream responded");
        Outcome::http(status.as_u16(), status_text, response_headers, parse_body(text))
    }

    /// Strips the request URL, which carries substituted secrets, and redacts
    /// whatever remains of the error.
    fn transport_failure(&self, request_id: &str, context: &str, err: reqwest::Error) -> Outcome {
        let code = transport_code(&err);
        let message = self.credentials.redact(&error_chain(&err.without_url()));
        warn!(request_id, code, "{}: {}", context, message);
        Outcome::transport_failure(message, code)
    }
}

/// `err` and its sources, joined with ": ".
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn classify(mut outcome: Outcome, detector: &dyn SoftErrorDetector) -> Outcome {
    if outcome.success && detector.is_soft_error(&outcome) {
        debug!(status = ?outcome.status, "2xx response carries error content");
        outcome.mark_soft_error();
    }
    outcome
}

/// JSON bodies become structured data, anything else stays text.
fn parse_body(text: String) -> Value {
    if text.is_empty() {
        return Value::String(text);
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "skipping header that is not valid HTTP"),
        }
    }
    map
}

/// Response headers as a flat map; repeated headers are joined with ", ".
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

fn transport_code(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        codes::TIMEOUT
    } else if err.is_connect() {
        codes::CONNECTION_FAILED
    } else if err.is_builder() {
        codes::INVALID_REQUEST
    } else {
        codes::NETWORK_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(r#"{"ok":true}"#.to_string()), json!({"ok": true}));
        assert_eq!(parse_body("plain".to_string()), json!("plain"));
        assert_eq!(parse_body(String::new()), json!(""));
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let headers = BTreeMap::from([
            ("Accept".to_string(), "application/json".to_string()),
            ("Bad Header".to_string(), "x".to_string()),
        ]);
        let map = header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map["accept"], "application/json");
    }

    #[test]
    fn test_flatten_repeated_headers() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        let flat = flatten_headers(&map);
        assert_eq!(flat["set-cookie"], "a=1, b=2");
    }

    #[tokio::test]
    async fn test_invalid_method_is_captured() {
        crate::utils::http_client::install_rustls_provider();
        let dispatcher = Dispatcher::new(Client::new());
        let outcome = dispatcher
            .dispatch(
                "1",
                DispatchRequest {
                    url: "http://127.0.0.1:9/".to_string(),
                    method: "NOT A METHOD".to_string(),
                    headers: BTreeMap::new(),
                    body: None,
                    timeout: Duration::from_secs(1),
                },
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.code,
            Some(ErrorCode::Transport(codes::INVALID_REQUEST.to_string()))
        );
    }
}
