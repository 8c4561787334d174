//! Ledger index queries (GraphQL over HTTP).

use std::time::Duration;

use ans104::Tag;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use super::record::LedgerTransaction;

/// Indexer faults. Every variant counts toward the poller's circuit breaker.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("index returned HTTP {0}")]
    Status(u16),

    #[error("index returned GraphQL errors: {0}")]
    GraphQl(String),

    #[error("unparsable index response: {0}")]
    Parse(String),
}

impl From<IndexError> for crate::Error {
    fn from(err: IndexError) -> Self {
        crate::Error::index(err.to_string())
    }
}

/// A source of candidate relay transactions.
#[async_trait]
pub trait LedgerIndex: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Up to `limit` most recent relay responses from `process_id`, highest
    /// block first.
    async fn relay_candidates(
        &self,
        process_id: &str,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, IndexError>;
}

const RELAY_CANDIDATES_QUERY: &str = r#"
query RelayCandidates($process: [String!]!, $first: Int!) {
  transactions(
    tags: [
      { name: "From-Process", values: $process }
      { name: "Action", values: ["Relay-Response"] }
      { name: "Status", values: ["Success"] }
      { name: "Data-Protocol", values: ["ao"] }
    ]
    first: $first
    sort: HEIGHT_DESC
  ) {
    edges {
      node {
        id
        block { height timestamp }
        data { size }
        tags { name value }
      }
    }
  }
}
"#;

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<QueryData>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct QueryData {
    transactions: Connection,
}

#[derive(Deserialize)]
struct Connection {
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Deserialize)]
struct Edge {
    node: Node,
}

#[derive(Deserialize)]
struct Node {
    id: String,
    block: Option<Block>,
    data: Option<DataMeta>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
struct Block {
    height: Option<u64>,
    timestamp: Option<i64>,
}

/// Gateways disagree on whether `size` is a string or a number.
#[derive(Deserialize)]
struct DataMeta {
    size: Option<Value>,
}

impl DataMeta {
    fn size(&self) -> u64 {
        match &self.size {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }
}

impl From<Node> for LedgerTransaction {
    fn from(node: Node) -> Self {
        Self {
            data_size: node.data.as_ref().map(DataMeta::size).unwrap_or(0),
            block_height: node.block.as_ref().and_then(|b| b.height),
            block_timestamp: node.block.as_ref().and_then(|b| b.timestamp),
            id: node.id,
            tags: node.tags,
        }
    }
}

/// GraphQL index endpoint.
pub struct GraphQlIndex {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl GraphQlIndex {
    pub fn new(client: Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LedgerIndex for GraphQlIndex {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn relay_candidates(
        &self,
        process_id: &str,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, IndexError> {
        let payload = json!({
            "query": RELAY_CANDIDATES_QUERY,
            "variables": { "process": [process_id], "first": limit },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(IndexError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_response(&body).inspect(|txs| {
            debug!(endpoint = %self.endpoint, count = txs.len(), "index query returned");
        })
    }
}

fn parse_response(body: &str) -> Result<Vec<LedgerTransaction>, IndexError> {
    let parsed: GraphQlResponse =
        serde_json::from_str(body).map_err(|e| IndexError::Parse(e.to_string()))?;

    if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
        return Err(IndexError::GraphQl(Value::Array(errors).to_string()));
    }

    let data = parsed
        .data
        .ok_or_else(|| IndexError::Parse("response has no data".to_string()))?;

    Ok(data
        .transactions
        .edges
        .into_iter()
        .map(|edge| edge.node.into())
        .collect())
}
