//! Writes outcomes back onto the ledger.
//!
//! Successful outcomes are redacted and serialized; anything larger than the
//! message ceiling is first shrunk (headers, then status text) and, failing
//! that, split into fixed-size chunks published in order. Failures go out as a
//! single compact error record.

use std::sync::Arc;

use ans104::Tag;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialTemplate;
use crate::dispatcher::Outcome;
use crate::ledger::{LedgerWriter, OutgoingMessage};

pub const ACTION_RESPONSE: &str = "axios-response";
pub const ACTION_RESPONSE_CHUNK: &str = "axios-response-chunk";

/// Default message size ceiling (9 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 9 * 1024 * 1024;
/// Default chunk size (6 MiB).
pub const DEFAULT_CHUNK_BYTES: usize = 6 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct PublisherLimits {
    pub max_message_bytes: usize,
    pub chunk_bytes: usize,
}

impl Default for PublisherLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

/// Who a response is for and what it must echo.
#[derive(Debug, Clone)]
pub struct ResponseAddress {
    /// Dedup entry id, sent as `RequestId`.
    pub request_id: i64,
    pub requester: String,
    pub passthrough: Vec<Tag>,
}

/// What was written for one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Single { message_id: String },
    Chunked {
        group_id: String,
        message_ids: Vec<String>,
    },
    Error { message_id: String },
}

impl Published {
    /// Id stored on the dedup entry: the single record, or the first chunk.
    pub fn first_id(&self) -> &str {
        match self {
            Self::Single { message_id } | Self::Error { message_id } => message_id,
            Self::Chunked { message_ids, .. } => {
                message_ids.first().map(String::as_str).unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("publishing response for request {request_id} failed: {source}")]
pub struct PublishError {
    pub request_id: i64,
    #[source]
    pub source: crate::Error,
    /// Id of the failure notification, when that one made it through.
    pub notification_id: Option<String>,
}

pub struct ResponsePublisher {
    writer: Arc<dyn LedgerWriter>,
    credentials: Arc<CredentialTemplate>,
    /// Process every response is addressed to.
    relay_process_id: String,
    limits: PublisherLimits,
}

impl ResponsePublisher {
    pub fn new(
        writer: Arc<dyn LedgerWriter>,
        credentials: Arc<CredentialTemplate>,
        relay_process_id: impl Into<String>,
        limits: PublisherLimits,
    ) -> Self {
        Self {
            writer,
            credentials,
            relay_process_id: relay_process_id.into(),
            limits,
        }
    }

    /// Publish `outcome`. On a failed write, one best-effort failure
    /// notification is attempted before the error is returned.
    pub async fn publish(
        &self,
        address: &ResponseAddress,
        outcome: &Outcome,
    ) -> Result<Published, PublishError> {
        let result = if outcome.success {
            self.publish_success(address, outcome).await
        } else {
            self.publish_error(address, outcome)
                .await
                .map(|message_id| Published::Error { message_id })
        };

        match result {
            Ok(published) => Ok(published),
            Err(source) => {
                error!(request_id = address.request_id, "response publish failed: {}", source);
                let notification_id = self.notify_failure(address, &source).await;
                Err(PublishError {
                    request_id: address.request_id,
                    source,
                    notification_id,
                })
            }
        }
    }

    fn base_tags(&self, address: &ResponseAddress, action: &str, status: &str) -> Vec<Tag> {
        vec![
            Tag::new("Action", action),
            Tag::new("RequestId", address.request_id.to_string()),
            Tag::new("Status", status),
            Tag::new("Requestor", address.requester.as_str()),
        ]
    }

    async fn publish_error(
        &self,
        address: &ResponseAddress,
        outcome: &Outcome,
    ) -> crate::Result<String> {
        let data = if outcome.soft_error {
            json!({
                "success": false,
                "error": "Error response detected",
                "code": outcome.status,
                "originalStatus": outcome.status,
                "isErrorResponse": true,
            })
            .to_string()
            .into_bytes()
        } else {
            self.fit_error_payload(address, outcome)?
        };

        let mut tags = self.base_tags(address, ACTION_RESPONSE, "Error");
        tags.push(Tag::new("IsErrorResponse", outcome.soft_error.to_string()));
        tags.extend(address.passthrough.iter().cloned());

        let message = OutgoingMessage::new(self.relay_process_id.as_str(), data).tags(tags);
        let id = self.writer.send(message).await?;
        info!(request_id = address.request_id, message_id = %id, "error response published");
        Ok(id)
    }

    async fn publish_success(
        &self,
        address: &ResponseAddress,
        outcome: &Outcome,
    ) -> crate::Result<Published> {
        let payload = self.fit_payload(outcome)?;

        if payload.len() <= self.limits.max_message_bytes {
            let mut tags = self.base_tags(address, ACTION_RESPONSE, "Success");
            tags.push(Tag::new("Optimized", "true"));
            tags.extend(address.passthrough.iter().cloned());

            let message = OutgoingMessage::new(self.relay_process_id.as_str(), payload).tags(tags);
            let message_id = self.writer.send(message).await?;
            info!(request_id = address.request_id, message_id = %message_id, "response published");
            return Ok(Published::Single { message_id });
        }

        self.publish_chunks(address, payload).await
    }

    /// Copy of `outcome` with every secret replaced by its placeholder.
    fn redacted(&self, outcome: &Outcome) -> Outcome {
        let credentials = &self.credentials;
        let mut redacted = outcome.clone();
        redacted.status_text = redacted.status_text.map(|t| credentials.redact(&t));
        redacted.headers = redacted.headers.map(|headers| {
            headers
                .into_iter()
                .map(|(k, v)| (credentials.redact(&k), credentials.redact(&v)))
                .collect()
        });
        redacted.data = redacted.data.map(|d| credentials.redact_value(&d));
        redacted.error = redacted.error.map(|e| credentials.redact(&e));
        redacted
    }

    /// Redacted serialization, shrunk to the ceiling when possible.
    fn fit_payload(&self, outcome: &Outcome) -> crate::Result<Vec<u8>> {
        let mut redacted = self.redacted(outcome);
        self.shrink(&mut redacted)
    }

    /// Error records are never chunked; a body that still does not fit after
    /// shrinking is left out and the status and error are kept.
    fn fit_error_payload(
        &self,
        address: &ResponseAddress,
        outcome: &Outcome,
    ) -> crate::Result<Vec<u8>> {
        let mut redacted = self.redacted(outcome);
        let mut payload = self.shrink(&mut redacted)?;

        if payload.len() > self.limits.max_message_bytes && redacted.data.is_some() {
            redacted.data = None;
            payload = serde_json::to_vec(&redacted)?;
            warn!(
                request_id = address.request_id,
                bytes = payload.len(),
                "error body dropped to fit message ceiling"
            );
        }
        Ok(payload)
    }

    /// Drop headers, then statusText, until `redacted` fits the ceiling.
    fn shrink(&self, redacted: &mut Outcome) -> crate::Result<Vec<u8>> {
        let ceiling = self.limits.max_message_bytes;
        let mut payload = serde_json::to_vec(&*redacted)?;

        if payload.len() > ceiling && redacted.headers.is_some() {
            redacted.headers = None;
            payload = serde_json::to_vec(&redacted)?;
            debug!(bytes = payload.len(), "dropped headers to fit");
        }
        if payload.len() > ceiling && redacted.status_text.is_some() {
            redacted.status_text = None;
            payload = serde_json::to_vec(&redacted)?;
            debug!(bytes = payload.len(), "dropped statusText to fit");
        }

        Ok(payload)
    }

    async fn publish_chunks(
        &self,
        address: &ResponseAddress,
        payload: Vec<u8>,
    ) -> crate::Result<Published> {
        let chunks = split_chunks(&payload, self.limits.chunk_bytes);
        let total = chunks.len();
        let group_id = format!(
            "chunk_{}_{}",
            address.request_id,
            crate::database::time::now_ms()
        );
        info!(
            request_id = address.request_id,
            bytes = payload.len(),
            chunks = total,
            group_id = %group_id,
            "response exceeds message ceiling, chunking"
        );

        let mut message_ids = Vec::with_capacity(total);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let is_last = index + 1 == total;
            let mut tags = self.base_tags(address, ACTION_RESPONSE_CHUNK, "Success");
            tags.extend([
                Tag::new("ChunkMessageId", group_id.as_str()),
                Tag::new("ChunkIndex", index.to_string()),
                Tag::new("TotalChunks", total.to_string()),
                Tag::new("IsLastChunk", is_last.to_string()),
            ]);
            tags.extend(address.passthrough.iter().cloned());

            let message = OutgoingMessage::new(self.relay_process_id.as_str(), chunk).tags(tags);
            let id = self.writer.send(message).await.map_err(|e| {
                crate::Error::ledger_write(format!(
                    "chunk {}/{} of {} failed: {}",
                    index + 1,
                    total,
                    group_id,
                    e
                ))
            })?;
            debug!(group_id = %group_id, index, message_id = %id, "chunk published");
            message_ids.push(id);
        }

        Ok(Published::Chunked {
            group_id,
            message_ids,
        })
    }

    async fn notify_failure(
        &self,
        address: &ResponseAddress,
        cause: &crate::Error,
    ) -> Option<String> {
        let data = json!({
            "success": false,
            "error": "Failed to send response",
            "originalError": self.credentials.redact(&cause.to_string()),
            "requestId": address.request_id,
            "targetProcessId": address.requester,
        })
        .to_string();

        let mut tags = self.base_tags(address, ACTION_RESPONSE, "Error");
        tags.push(Tag::new("IsErrorResponse", "true"));
        tags.push(Tag::new("ErrorType", "SendFailure"));

        let message = OutgoingMessage::new(self.relay_process_id.as_str(), data).tags(tags);
        match self.writer.send(message).await {
            Ok(id) => {
                warn!(
                    request_id = address.request_id,
                    message_id = %id,
                    "failure notification published"
                );
                Some(id)
            }
            Err(e) => {
                error!(request_id = address.request_id, "failure notification also failed: {}", e);
                None
            }
        }
    }
}

/// Split `payload` into `chunk_bytes`-sized pieces. Chunks are byte ranges and
/// may split a UTF-8 sequence; the requester reassembles bytes, not text.
pub fn split_chunks(payload: &[u8], chunk_bytes: usize) -> Vec<Vec<u8>> {
    payload
        .chunks(chunk_bytes.max(1))
        .map(<[u8]>::to_vec)
        .collect()
}
