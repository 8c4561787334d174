use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `code` on a failed outcome: the HTTP status, or a transport error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Status(u16),
    Transport(String),
}

/// Transport error codes.
pub mod codes {
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
}

/// The normalized result of executing a request.
///
/// Serializes with the field order and names requesters parse:
/// `status, statusText, headers, data, success, error, code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<ErrorCode>,
    /// Set when a 2xx response was downgraded by a soft-error detector.
    #[serde(skip)]
    pub soft_error: bool,
}

impl Outcome {
    /// Outcome of a completed HTTP exchange. Non-2xx is a failure that keeps
    /// the status.
    pub fn http(
        status: u16,
        status_text: impl Into<String>,
        headers: BTreeMap<String, String>,
        data: Value,
    ) -> Self {
        let status_text = status_text.into();
        let success = (200..300).contains(&status);
        Self {
            error: (!success).then(|| format!("HTTP {status}: {status_text}")),
            code: (!success).then_some(ErrorCode::Status(status)),
            status: Some(status),
            status_text: Some(status_text),
            headers: Some(headers),
            data: Some(data),
            success,
            soft_error: false,
        }
    }

    /// The request never produced a response.
    pub fn transport_failure(error: impl Into<String>, code: &str) -> Self {
        Self {
            status: None,
            status_text: None,
            headers: None,
            data: None,
            success: false,
            error: Some(error.into()),
            code: Some(ErrorCode::Transport(code.to_string())),
            soft_error: false,
        }
    }

    /// A failure decided by the bridge itself (e.g. a handler rejecting its
    /// input), reported with an HTTP-style status.
    pub fn rejected(status: u16, status_text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            status_text: Some(status_text.into()),
            headers: None,
            data: None,
            success: false,
            error: Some(error.into()),
            code: Some(ErrorCode::Status(status)),
            soft_error: false,
        }
    }

    /// Downgrade a 2xx outcome whose payload carries error content.
    pub fn mark_soft_error(&mut self) {
        self.success = false;
        self.soft_error = true;
        self.error = Some("Error response detected".to_string());
        self.code = self.status.map(ErrorCode::Status);
    }

    /// Compact JSON kept in the dedup store.
    pub fn summary(&self) -> String {
        serde_json::json!({
            "success": self.success,
            "status": self.status,
            "statusText": self.status_text,
            "error": self.error,
            "softError": self.soft_error,
        })
        .to_string()
    }
}
