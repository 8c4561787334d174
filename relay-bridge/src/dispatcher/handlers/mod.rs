//! Pluggable action handlers.
//!
//! A handler claims requests by URL and produces the [`Outcome`] itself
//! instead of the generic HTTP call. Retries, if any, are the handler's own
//! business.

pub mod price;

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::outcome::Outcome;
use super::soft_error::SoftErrorDetector;

pub use price::{HttpQuoteSource, PriceQuoteHandler, QuoteError, QuoteSource, RetryPolicy};

/// Request parameters handed to a handler, after credential substitution.
#[derive(Debug, Clone)]
pub struct ActionParams {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl ActionParams {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler owns requests to `url`.
    fn matches(&self, url: &str) -> bool;

    async fn execute(&self, request_id: &str, params: &ActionParams) -> Outcome;

    /// Detector for this handler's outcomes; `None` uses the dispatcher's.
    fn soft_error_detector(&self) -> Option<&dyn SoftErrorDetector> {
        None
    }
}
