//! Detection of failures hidden behind a 2xx status.
//!
//! Some upstream gateways answer 200 with an HTML error page or a JSON error
//! object. The default heuristic catches the common shapes; it can misfire on
//! legitimate bodies that merely mention an error, so handlers may supply
//! their own detector.

use serde_json::Value;

use super::outcome::Outcome;

pub trait SoftErrorDetector: Send + Sync {
    /// Whether a transport-successful `outcome` actually carries an error.
    fn is_soft_error(&self, outcome: &Outcome) -> bool;
}

/// HTML error pages and JSON objects with a truthy `error` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupErrorDetector;

impl SoftErrorDetector for MarkupErrorDetector {
    fn is_soft_error(&self, outcome: &Outcome) -> bool {
        match &outcome.data {
            Some(Value::String(text)) => {
                let lower = text.to_lowercase();
                lower.contains("<!doctype html>")
                    && (lower.contains("error")
                        || lower.contains("not found")
                        || lower.contains("404"))
            }
            Some(Value::Object(map)) => map.get("error").is_some_and(is_truthy),
            _ => false,
        }
    }
}

/// Never reports a soft error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSoftErrors;

impl SoftErrorDetector for NoSoftErrors {
    fn is_soft_error(&self, _outcome: &Outcome) -> bool {
        false
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
