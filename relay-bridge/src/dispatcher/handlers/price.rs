//! Token price lookups served from a swap-quote service.
//!
//! A price is the quoted output of swapping one whole token (`10^denomination`
//! base units) into wUSDC, taken 1:1 as USD.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ActionHandler, ActionParams};
use crate::dispatcher::outcome::Outcome;
use crate::dispatcher::soft_error::{NoSoftErrors, SoftErrorDetector};

/// wUSDC process id, the quote currency.
pub const WUSDC_TOKEN_ID: &str = "7zH9dlMNoxprab9loshv3Y7WG45DOny_Vrq9KrXObdQ";

/// Address quotes are requested on behalf of; the service requires one.
pub const QUOTE_USER_ADDRESS: &str = "j6R9ITLNyll_nckPdnvUGz_sSdnuLVGFIWbymj72SJM";

pub const DEFAULT_DENOMINATION: u32 = 12;
pub const MAX_DENOMINATION: u32 = 18;

const NON_RETRYABLE_MARKERS: &[&str] = &["Invalid token", "Token not found", "Unsupported token"];

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("no routes available")]
    NoRoutes,

    #[error("{0}")]
    Transient(String),

    /// Unknown or unsupported token; retrying cannot help.
    #[error("{0}")]
    Fatal(String),
}

impl QuoteError {
    /// Classify a failure message from the quote service.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if NON_RETRYABLE_MARKERS.iter().any(|m| message.contains(m)) {
            Self::Fatal(message)
        } else {
            Self::Transient(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub from_token_id: String,
    pub to_token_id: String,
    pub amount: String,
    pub user_address: String,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Raw swap quote as returned by the service.
    async fn swap_quote(&self, request: &QuoteRequest) -> Result<Value, QuoteError>;
}

/// Quote service reached over HTTP (`POST` with a JSON [`QuoteRequest`]).
pub struct HttpQuoteSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpQuoteSource {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn swap_quote(&self, request: &QuoteRequest) -> Result<Value, QuoteError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| QuoteError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QuoteError::Transient(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(body);
            return Err(QuoteError::from_message(format!("HTTP {status}: {message}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| QuoteError::Transient(format!("unparsable quote: {e}")))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(2000),
        }
    }
}

/// A usable quote.
#[derive(Debug, Clone)]
struct PriceQuote {
    estimated_output: Value,
    usd_price: f64,
    quote: Value,
}

pub struct PriceQuoteHandler {
    url_prefix: String,
    bearer_token: String,
    source: Arc<dyn QuoteSource>,
    retry: RetryPolicy,
}

impl PriceQuoteHandler {
    pub fn new(
        url_prefix: impl Into<String>,
        bearer_token: impl Into<String>,
        source: Arc<dyn QuoteSource>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            bearer_token: bearer_token.into(),
            source,
            retry,
        }
    }

    fn authorized(&self, params: &ActionParams) -> bool {
        params
            .header("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .is_some_and(|token| token == self.bearer_token)
    }

    async fn fetch_price(
        &self,
        token_id: &str,
        denomination: u32,
    ) -> Result<PriceQuote, QuoteError> {
        let request = QuoteRequest {
            from_token_id: token_id.to_string(),
            to_token_id: WUSDC_TOKEN_ID.to_string(),
            amount: format!("1{}", "0".repeat(denomination as usize)),
            user_address: QUOTE_USER_ADDRESS.to_string(),
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.source.swap_quote(&request).await {
                Ok(quote) => price_from_quote(quote),
                Err(e) => Err(e),
            };

            match result {
                Ok(price) => {
                    debug!(token_id, attempt, "quote received");
                    return Ok(price);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(token_id, attempt, error = %e, "quote failed, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(token_id, attempt, error = %e, "quote failed, attempts exhausted");
                    return Err(QuoteError::Transient(format!(
                        "quote failed after {max_attempts} attempts: {e}"
                    )));
                }
                Err(e) => {
                    debug!(
                        token_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "quote attempt failed, retrying in {:?}",
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn is_present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Bool(b) => *b,
        _ => true,
    })
}

fn price_from_quote(quote: Value) -> Result<PriceQuote, QuoteError> {
    let has_routes = quote
        .get("routes")
        .and_then(Value::as_array)
        .is_some_and(|routes| !routes.is_empty());
    if !has_routes {
        return Err(QuoteError::NoRoutes);
    }

    let estimated_output = is_present(quote.get("estimatedOutput"))
        .or_else(|| is_present(quote.pointer("/bestRoute/estimatedOutput")))
        .or_else(|| is_present(quote.pointer("/routes/0/estimatedOutput")))
        .cloned()
        .ok_or_else(|| QuoteError::Transient("no estimatedOutput in quote".to_string()))?;

    let usd_price = match &estimated_output {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|p| p.is_finite() && *p >= 0.0)
    .ok_or_else(|| {
        QuoteError::Transient(format!("invalid estimatedOutput: {estimated_output}"))
    })?;

    Ok(PriceQuote {
        estimated_output,
        usd_price,
        quote,
    })
}

#[async_trait]
impl ActionHandler for PriceQuoteHandler {
    fn name(&self) -> &str {
        "price-quote"
    }

    fn matches(&self, url: &str) -> bool {
        url.starts_with(&self.url_prefix)
    }

    async fn execute(&self, request_id: &str, params: &ActionParams) -> Outcome {
        if !self.authorized(params) {
            warn!(request_id, "price request without a valid bearer token");
            return Outcome::rejected(
                401,
                "Unauthorized",
                "Unauthorized: Invalid or missing bearer token",
            );
        }

        let token_id = params
            .url
            .strip_prefix(&self.url_prefix)
            .unwrap_or_default()
            .to_string();
        if token_id.is_empty() {
            return Outcome::rejected(400, "Bad Request", "Invalid token ID in URL");
        }

        let denomination = match params.header("X-Denomination") {
            None => DEFAULT_DENOMINATION,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(d) if d <= MAX_DENOMINATION => d,
                _ => {
                    return Outcome::rejected(
                        400,
                        "Bad Request",
                        format!(
                            "Invalid denomination: {raw}. Must be between 0 and {MAX_DENOMINATION}"
                        ),
                    );
                }
            },
        };

        match self.fetch_price(&token_id, denomination).await {
            Ok(price) => {
                info!(request_id, %token_id, usd_price = price.usd_price, "price fetched");
                let headers = BTreeMap::from([
                    ("content-type".to_string(), "application/json".to_string()),
                    ("x-token-id".to_string(), token_id.clone()),
                    ("x-denomination".to_string(), denomination.to_string()),
                    ("x-usd-price".to_string(), price.usd_price.to_string()),
                ]);
                let data = json!({
                    "tokenId": token_id,
                    "denomination": denomination,
                    "estimatedOutput": price.estimated_output,
                    "usdPrice": price.usd_price,
                    "quote": price.quote,
                    "message": format!("Successfully fetched price for token {token_id}"),
                    "timestamp": chrono::Utc::now()
                        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                });
                Outcome::http(200, "OK", headers, data)
            }
            Err(e) => Outcome::rejected(
                500,
                "Internal Server Error",
                format!("Price fetching failed: {e}"),
            ),
        }
    }

    fn soft_error_detector(&self) -> Option<&dyn SoftErrorDetector> {
        Some(&NoSoftErrors)
    }
}
