//! Fetches a transaction's data section from a gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{Error, Result};

#[async_trait]
pub trait TransactionDataSource: Send + Sync {
    /// The raw data section of `transaction_id`, as text.
    async fn fetch_data(&self, transaction_id: &str) -> Result<String>;
}

pub struct GatewayClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl TransactionDataSource for GatewayClient {
    async fn fetch_data(&self, transaction_id: &str) -> Result<String> {
        // Redirects to the data host are followed by the client.
        let url = format!("{}/{}", self.base_url, transaction_id);
        let response = self.client.get(&url).timeout(self.timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Other(format!(
                "gateway returned {status} for {transaction_id}"
            )));
        }

        let data = response.text().await?;
        if data.is_empty() {
            return Err(Error::Other(format!(
                "gateway returned an empty data section for {transaction_id}"
            )));
        }
        Ok(data)
    }
}
