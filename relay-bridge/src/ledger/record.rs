//! Ledger transactions and the request records parsed from them.

use std::collections::BTreeMap;
use std::time::Duration;

use ans104::Tag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of tags that are echoed verbatim onto the response.
pub const PASSTHROUGH_PREFIX: &str = "X-";

/// Timeout applied when a record carries none, or an unusable one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Transaction metadata as returned by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub block_height: Option<u64>,
    pub block_timestamp: Option<i64>,
    pub data_size: u64,
    pub tags: Vec<Tag>,
}

impl LedgerTransaction {
    /// Value of the tag `name`. Repeated names resolve to the last occurrence.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    /// Local re-check of the index filter: a successful relay response that
    /// names a URL and a method.
    pub fn is_relay_candidate(&self) -> bool {
        self.tag("Action") == Some("Relay-Response")
            && self.tag("Status") == Some("Success")
            && self.tag("URL").is_some_and(|v| !v.is_empty())
            && self.tag("Method").is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("transaction {0} is not a relay request")]
    NotCandidate(String),

    #[error("transaction {0} has no Reference tag")]
    MissingReference(String),
}

/// Where the request body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySource {
    None,
    PostData(String),
    Body(String),
    /// The body is the transaction's own data section and must be fetched.
    DataField,
}

/// A relay request, immutable once read from the ledger.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Dedup key, taken from the `Reference` tag.
    pub id: String,
    pub transaction_id: String,
    pub url: String,
    pub method: String,
    /// `Headers` tag as written; kept for persistence.
    pub raw_headers: Option<String>,
    /// Parsed `Headers`; absent or malformed JSON is empty.
    pub headers: BTreeMap<String, String>,
    pub body: BodySource,
    pub timeout: Duration,
    pub requester: Option<String>,
    pub passthrough: Vec<Tag>,
}

impl RequestRecord {
    pub fn from_transaction(tx: &LedgerTransaction) -> Result<Self, RecordError> {
        if !tx.is_relay_candidate() {
            return Err(RecordError::NotCandidate(tx.id.clone()));
        }

        let id = match tx.tag("Reference") {
            Some(reference) if !reference.is_empty() => reference.to_string(),
            _ => return Err(RecordError::MissingReference(tx.id.clone())),
        };

        let raw_headers = tx.tag("Headers").map(str::to_string);

        Ok(Self {
            id,
            transaction_id: tx.id.clone(),
            url: tx.tag("URL").unwrap_or_default().to_string(),
            method: tx.tag("Method").unwrap_or_default().to_uppercase(),
            headers: parse_headers(raw_headers.as_deref()),
            raw_headers,
            body: body_source(tx),
            timeout: parse_timeout(tx.tag("Timeout")),
            requester: tx
                .tag("Requestor")
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            passthrough: passthrough_tags(&tx.tags),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn sends_body(&self) -> bool {
        self.method != "GET"
    }
}

fn body_source(tx: &LedgerTransaction) -> BodySource {
    let non_blank = |name: &str| {
        tx.tag(name)
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
    };

    if let Some(post_data) = non_blank("Post-Data") {
        BodySource::PostData(post_data)
    } else if let Some(body) = non_blank("Body") {
        BodySource::Body(body)
    } else if tx.tag("Body-Source") == Some("Data-Field") && tx.data_size > 0 {
        BodySource::DataField
    } else {
        BodySource::None
    }
}

/// Parse the `Headers` JSON object. Non-string values are kept in their JSON
/// text form.
pub fn parse_headers(raw: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return BTreeMap::new();
    };

    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Headers tag is not a JSON object, using no headers: {}", e);
            BTreeMap::new()
        }
    }
}

fn parse_timeout(raw: Option<&str>) -> Duration {
    let ms = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    Duration::from_millis(ms)
}

/// Passthrough tags in first-seen order; a repeated name keeps its last value.
fn passthrough_tags(tags: &[Tag]) -> Vec<Tag> {
    let mut out: Vec<Tag> = Vec::new();
    for tag in tags.iter().filter(|t| t.name.starts_with(PASSTHROUGH_PREFIX)) {
        match out.iter_mut().find(|t| t.name == tag.name) {
            Some(existing) => existing.value = tag.value.clone(),
            None => out.push(tag.clone()),
        }
    }
    out
}
