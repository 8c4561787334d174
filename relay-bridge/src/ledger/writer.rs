//! Writes signed messages to the ledger through a message unit (MU).

use std::sync::Arc;
use std::time::Duration;

use ans104::{DataItem, DataItemBuilder, Tag, Wallet};
use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, info};

use crate::utils::preview;
use crate::{Error, Result};

/// Timeout for a single MU call.
const MU_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// SDK tag carried on every message the bridge signs.
pub const SDK_NAME: &str = "relay-bridge";

/// A message to be written onto the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Process the message is addressed to.
    pub target: String,
    pub tags: Vec<Tag>,
    pub data: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(target: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            target: target.into(),
            tags: Vec::new(),
            data: data.into(),
        }
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }
}

#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Publish `message`, returning the ledger message id.
    async fn send(&self, message: OutgoingMessage) -> Result<String>;
}

/// Keeps a scheduler process's time-driven triggers firing.
#[async_trait]
pub trait SchedulerMonitor: Send + Sync {
    async fn subscribe(&self, process_id: &str) -> Result<()>;
    async fn unsubscribe(&self, process_id: &str) -> Result<()>;
}

/// Message-unit client signing with the bridge wallet.
pub struct MessengerClient {
    client: Client,
    mu_url: String,
    wallet: Arc<Wallet>,
}

impl MessengerClient {
    pub fn new(client: Client, mu_url: impl Into<String>, wallet: Arc<Wallet>) -> Self {
        Self {
            client,
            mu_url: mu_url.into().trim_end_matches('/').to_string(),
            wallet,
        }
    }

    /// Sign off the async runtime; RSA-4096 is slow enough to stall a tick.
    async fn sign(&self, builder: DataItemBuilder) -> Result<DataItem> {
        let wallet = self.wallet.clone();
        let item = tokio::task::spawn_blocking(move || builder.sign(&wallet))
            .await
            .map_err(|e| Error::Other(format!("signing task failed: {e}")))??;
        Ok(item)
    }

    async fn post_item(&self, method: Method, url: &str, item: &DataItem) -> Result<()> {
        let response = self
            .client
            .request(method, url)
            .timeout(MU_REQUEST_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(item.to_bytes())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ledger_write(format!(
                "message unit returned {}: {}",
                status,
                preview(&body, 200)
            )));
        }
        Ok(())
    }

    fn protocol_item(data: Vec<u8>, kind: &str) -> DataItemBuilder {
        DataItemBuilder::new(data)
            .tag("Data-Protocol", "ao")
            .tag("Variant", "ao.TN.1")
            .tag("Type", kind)
            .tag("SDK", SDK_NAME)
    }
}

#[async_trait]
impl LedgerWriter for MessengerClient {
    async fn send(&self, message: OutgoingMessage) -> Result<String> {
        let action = message.tag_value("Action").unwrap_or_default().to_string();
        let builder = Self::protocol_item(message.data, "Message")
            .target(&message.target)?
            .tags(message.tags);
        let item = self.sign(builder).await?;
        let id = item.id();

        self.post_item(Method::POST, &self.mu_url, &item).await?;
        debug!(
            message_id = %id,
            target = %message.target,
            action = %action,
            "message accepted by MU"
        );
        Ok(id)
    }
}

#[async_trait]
impl SchedulerMonitor for MessengerClient {
    async fn subscribe(&self, process_id: &str) -> Result<()> {
        let builder = Self::protocol_item(b" ".to_vec(), "Monitor").target(process_id)?;
        let item = self.sign(builder).await?;
        let url = format!("{}/monitor/{}", self.mu_url, process_id);

        self.post_item(Method::POST, &url, &item).await?;
        info!(process_id, "subscribed to scheduler process");
        Ok(())
    }

    async fn unsubscribe(&self, process_id: &str) -> Result<()> {
        let builder = Self::protocol_item(b" ".to_vec(), "Monitor").target(process_id)?;
        let item = self.sign(builder).await?;
        let url = format!("{}/monitor/{}", self.mu_url, process_id);

        self.post_item(Method::DELETE, &url, &item).await?;
        info!(process_id, "unsubscribed from scheduler process");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_tags() {
        let msg = OutgoingMessage::new("proc", "{}")
            .tags([Tag::new("Action", "axios-response")])
            .tags([Tag::new("X-Id", "1")]);
        assert_eq!(msg.tag_value("Action"), Some("axios-response"));
        assert_eq!(msg.tag_value("X-Id"), Some("1"));
        assert_eq!(msg.tag_value("Missing"), None);
    }
}
