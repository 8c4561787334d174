//! Claim, dispatch, publish and complete one request record.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::credentials::CredentialTemplate;
use crate::dedup::{ClaimError, ClaimMetadata, DedupStatus, DedupStore, OutcomeSummary};
use crate::dispatcher::{DispatchRequest, Dispatcher};
use crate::ledger::{BodySource, RequestRecord, TransactionDataSource};
use crate::publisher::{ResponseAddress, ResponsePublisher};
use crate::utils::preview;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A dedup entry already exists.
    AlreadySeen,
    /// Lost the claim race to another caller.
    AlreadyClaimed,
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    /// A response (or error record) reached the ledger.
    Published {
        entry_id: i64,
        response_id: String,
        success: bool,
    },
    /// Claimed but never dispatched.
    Abandoned { entry_id: i64, reason: String },
    /// Dispatched, but the response could not be written.
    PublishFailed {
        entry_id: i64,
        notification_id: Option<String>,
    },
}

pub struct RequestPipeline {
    store: Arc<dyn DedupStore>,
    credentials: Arc<CredentialTemplate>,
    dispatcher: Arc<Dispatcher>,
    publisher: Arc<ResponsePublisher>,
    data_source: Arc<dyn TransactionDataSource>,
}

impl RequestPipeline {
    pub fn new(
        store: Arc<dyn DedupStore>,
        credentials: Arc<CredentialTemplate>,
        dispatcher: Arc<Dispatcher>,
        publisher: Arc<ResponsePublisher>,
        data_source: Arc<dyn TransactionDataSource>,
    ) -> Self {
        Self {
            store,
            credentials,
            dispatcher,
            publisher,
            data_source,
        }
    }

    pub fn store(&self) -> &Arc<dyn DedupStore> {
        &self.store
    }

    /// Run `record` through the pipeline. Errors are dedup store failures;
    /// everything else is reported through [`ProcessOutcome`].
    pub async fn process(&self, record: &RequestRecord) -> Result<ProcessOutcome> {
        if self.store.has_seen(&record.id).await? {
            return Ok(ProcessOutcome::Skipped(SkipReason::AlreadySeen));
        }

        let entry_id = match self.store.claim(&record.id, &self.claim_metadata(record)).await {
            Ok(id) => id,
            Err(ClaimError::AlreadyClaimed) => {
                debug!(request_id = %record.id, "already claimed elsewhere, skipping");
                return Ok(ProcessOutcome::Skipped(SkipReason::AlreadyClaimed));
            }
            Err(ClaimError::Store(e)) => return Err(e),
        };

        info!(
            request_id = %record.id,
            entry_id,
            method = %record.method,
            url = %self.credentials.redact(&record.url),
            "processing new request"
        );

        let Some(requester) = record.requester.clone() else {
            return self.abandon(entry_id, "record has no Requestor tag").await;
        };

        let body = match self.resolve_body(record).await {
            Ok(body) => body,
            Err(e) => {
                let reason = format!("failed to fetch data section: {e}");
                return self.abandon(entry_id, &reason).await;
            }
        };

        let request = DispatchRequest {
            url: self.credentials.substitute(&record.url),
            method: record.method.clone(),
            headers: record
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), self.credentials.substitute(v)))
                .collect(),
            body: body.map(|b| self.credentials.substitute(&b)),
            timeout: record.timeout,
        };

        let outcome = self.dispatcher.dispatch(&record.id, request).await;
        debug!(
            request_id = %record.id,
            success = outcome.success,
            status = ?outcome.status,
            "dispatch finished"
        );

        let address = ResponseAddress {
            request_id: entry_id,
            requester,
            passthrough: record.passthrough.clone(),
        };

        match self.publisher.publish(&address, &outcome).await {
            Ok(published) => {
                let response_id = published.first_id().to_string();
                let summary = OutcomeSummary {
                    status: if outcome.success {
                        DedupStatus::Completed
                    } else {
                        DedupStatus::Failed
                    },
                    response_id: Some(response_id.clone()),
                    summary: Some(self.credentials.redact(&outcome.summary())),
                    error: outcome.error.as_deref().map(|e| self.credentials.redact(e)),
                };
                self.store.complete(entry_id, &summary).await?;

                info!(request_id = %record.id, entry_id, %response_id, "request completed");
                Ok(ProcessOutcome::Published {
                    entry_id,
                    response_id,
                    success: outcome.success,
                })
            }
            Err(e) => {
                let error = self.credentials.redact(&format!("Send failure: {}", e.source));
                let summary = OutcomeSummary::failed(e.notification_id.clone(), error);
                if let Err(store_err) = self.store.complete(entry_id, &summary).await {
                    error!(entry_id, "failed to record publish failure: {}", store_err);
                    return Err(store_err);
                }
                Ok(ProcessOutcome::PublishFailed {
                    entry_id,
                    notification_id: e.notification_id,
                })
            }
        }
    }

    fn claim_metadata(&self, record: &RequestRecord) -> ClaimMetadata {
        let inline_body = match &record.body {
            BodySource::PostData(b) | BodySource::Body(b) => Some(self.credentials.redact(b)),
            BodySource::DataField | BodySource::None => None,
        };

        ClaimMetadata {
            url: self.credentials.redact(&record.url),
            method: record.method.clone(),
            headers: record.raw_headers.as_deref().map(|h| self.credentials.redact(h)),
            body: inline_body,
            timeout_ms: i64::try_from(record.timeout.as_millis()).unwrap_or(i64::MAX),
        }
    }

    async fn resolve_body(&self, record: &RequestRecord) -> Result<Option<String>> {
        if !record.sends_body() {
            return Ok(None);
        }
        match &record.body {
            BodySource::PostData(b) | BodySource::Body(b) => Ok(Some(b.clone())),
            BodySource::None => Ok(None),
            BodySource::DataField => {
                let data = self.data_source.fetch_data(&record.transaction_id).await?;
                debug!(
                    request_id = %record.id,
                    bytes = data.len(),
                    "body fetched from data section"
                );
                Ok(Some(data))
            }
        }
    }

    async fn abandon(&self, entry_id: i64, reason: &str) -> Result<ProcessOutcome> {
        warn!(entry_id, "abandoning request: {}", preview(reason, 300));
        self.store
            .complete(entry_id, &OutcomeSummary::failed(None, reason))
            .await?;
        Ok(ProcessOutcome::Abandoned {
            entry_id,
            reason: reason.to_string(),
        })
    }
}
