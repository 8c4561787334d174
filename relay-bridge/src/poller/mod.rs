//! Ledger poller.
//!
//! On every tick the poller asks the primary index for recent relay
//! candidates, falls back to the secondary index on failure, and feeds what it
//! finds through the [`RequestPipeline`] one record at a time. Repeated index
//! failures open a circuit breaker that suspends querying for a cooldown.

pub mod circuit_breaker;
pub mod pipeline;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use pipeline::{ProcessOutcome, RequestPipeline, SkipReason};

use crate::ledger::{LedgerIndex, LedgerTransaction, RecordError, RequestRecord};
use crate::{Error, Result};

/// Mutable bridge-wide state, shared between the poller and the liveness
/// companion.
pub struct BridgeState {
    pub breaker: CircuitBreaker,
    subscribed: AtomicBool,
    ticks: AtomicU64,
    dispatched: AtomicU64,
}

impl BridgeState {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            breaker,
            subscribed: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::SeqCst);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Records that reached dispatch since startup.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub relay_process_id: String,
    pub query_limit: u32,
    pub interval: Duration,
}

/// Per-tick counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The breaker was open; no query was made.
    pub suspended: bool,
    /// Transactions returned by the index.
    pub fetched: usize,
    /// Transactions that passed the local filter and carry a `Reference`.
    pub candidates: usize,
    pub published: usize,
    pub skipped: usize,
    pub abandoned: usize,
    pub failed: usize,
}

/// Most recent candidate from one requester, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterLatest {
    pub requester: String,
    pub transaction_id: String,
    pub request_id: Option<String>,
    pub block_height: Option<u64>,
}

pub struct LedgerPoller {
    primary: Arc<dyn LedgerIndex>,
    fallback: Option<Arc<dyn LedgerIndex>>,
    pipeline: Arc<RequestPipeline>,
    state: Arc<BridgeState>,
    config: PollerConfig,
    tick_lock: Mutex<()>,
}

impl LedgerPoller {
    pub fn new(
        primary: Arc<dyn LedgerIndex>,
        fallback: Option<Arc<dyn LedgerIndex>>,
        pipeline: Arc<RequestPipeline>,
        state: Arc<BridgeState>,
        config: PollerConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            pipeline,
            state,
            config,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    /// Poll until `cancel` fires. A tick that has started always finishes.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            process_id = %self.config.relay_process_id,
            interval = ?self.config.interval,
            "Ledger poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Ledger poller shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.suspended => {}
                Ok(report) => debug!(?report, "tick finished"),
                Err(e) if e.is_indexer_fault() => warn!("Index query failed: {}", e),
                Err(e) => error!("Tick failed: {}", e),
            }
        }
        debug!("Ledger poller stopped");
    }

    /// Run one poll cycle. Overlapping calls are serialized.
    pub async fn tick(&self) -> Result<TickReport> {
        let _guard = self.tick_lock.lock().await;
        self.state.ticks.fetch_add(1, Ordering::SeqCst);

        if !self.state.breaker.is_allowed() {
            debug!(
                remaining = ?self.state.breaker.remaining_cooldown(),
                "index circuit breaker open, skipping query"
            );
            return Ok(TickReport {
                suspended: true,
                ..Default::default()
            });
        }

        let transactions = match self.query().await {
            Ok(txs) => {
                self.state.breaker.record_success();
                txs
            }
            Err(e) => {
                if e.is_indexer_fault() {
                    self.state.breaker.record_failure();
                }
                return Err(e);
            }
        };

        let mut report = TickReport {
            fetched: transactions.len(),
            ..Default::default()
        };

        let records = self.candidates(&transactions);
        report.candidates = records.len();
        info!(
            fetched = report.fetched,
            candidates = report.candidates,
            "index returned relay candidates"
        );
        self.log_latest_per_requester(&transactions).await;

        for record in &records {
            match self.pipeline.process(record).await {
                Ok(ProcessOutcome::Skipped(_)) => report.skipped += 1,
                Ok(ProcessOutcome::Published { .. }) => {
                    self.state.dispatched.fetch_add(1, Ordering::SeqCst);
                    report.published += 1;
                }
                Ok(ProcessOutcome::PublishFailed { .. }) => {
                    self.state.dispatched.fetch_add(1, Ordering::SeqCst);
                    report.failed += 1;
                }
                Ok(ProcessOutcome::Abandoned { .. }) => report.abandoned += 1,
                Err(e) => {
                    error!(request_id = %record.id, "processing failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Primary first, then the fallback; one breaker failure per tick.
    async fn query(&self) -> Result<Vec<LedgerTransaction>> {
        let process_id = &self.config.relay_process_id;
        let limit = self.config.query_limit;

        let primary_err = match self.primary.relay_candidates(process_id, limit).await {
            Ok(txs) => return Ok(txs),
            Err(e) => e,
        };
        warn!(endpoint = self.primary.name(), "primary index failed: {}", primary_err);

        let Some(fallback) = &self.fallback else {
            return Err(primary_err.into());
        };

        match fallback.relay_candidates(process_id, limit).await {
            Ok(txs) => {
                info!(endpoint = fallback.name(), "fallback index answered");
                Ok(txs)
            }
            Err(fallback_err) => {
                warn!(endpoint = fallback.name(), "fallback index failed: {}", fallback_err);
                Err(Error::index(format!(
                    "primary: {primary_err}; fallback: {fallback_err}"
                )))
            }
        }
    }

    /// Parse and filter transactions, keeping ledger order.
    fn candidates(&self, transactions: &[LedgerTransaction]) -> Vec<RequestRecord> {
        transactions
            .iter()
            .filter_map(|tx| match RequestRecord::from_transaction(tx) {
                Ok(record) => Some(record),
                Err(RecordError::MissingReference(id)) => {
                    debug!(transaction_id = %id, "skipping candidate without Reference tag");
                    None
                }
                Err(RecordError::NotCandidate(_)) => None,
            })
            .collect()
    }

    async fn log_latest_per_requester(&self, transactions: &[LedgerTransaction]) {
        for latest in latest_per_requester(transactions) {
            let processed = match &latest.request_id {
                Some(id) => self.pipeline.store().has_seen(id).await.unwrap_or(false),
                None => false,
            };
            debug!(
                requester = %latest.requester,
                transaction_id = %latest.transaction_id,
                request_id = latest.request_id.as_deref().unwrap_or("-"),
                block_height = ?latest.block_height,
                processed,
                "most recent candidate for requester"
            );
        }
    }
}

/// First candidate per requester, in ledger order (most recent first).
pub fn latest_per_requester(transactions: &[LedgerTransaction]) -> Vec<RequesterLatest> {
    let mut seen = HashSet::new();
    transactions
        .iter()
        .filter(|tx| tx.is_relay_candidate())
        .filter_map(|tx| {
            let requester = tx.tag("Requestor")?;
            seen.insert(requester.to_string()).then(|| RequesterLatest {
                requester: requester.to_string(),
                transaction_id: tx.id.clone(),
                request_id: tx.tag("Reference").map(str::to_string),
                block_height: tx.block_height,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ans104::Tag;

    fn tx(id: &str, height: u64, requester: &str, reference: &str) -> LedgerTransaction {
        LedgerTransaction {
            id: id.to_string(),
            block_height: Some(height),
            block_timestamp: None,
            data_size: 0,
            tags: vec![
                Tag::new("Action", "Relay-Response"),
                Tag::new("Status", "Success"),
                Tag::new("URL", "https://example.com"),
                Tag::new("Method", "GET"),
                Tag::new("Requestor", requester),
                Tag::new("Reference", reference),
            ],
        }
    }

    #[test]
    fn test_latest_per_requester() {
        let txs = vec![
            tx("t3", 30, "alice", "r3"),
            tx("t2", 20, "bob", "r2"),
            tx("t1", 10, "alice", "r1"),
        ];

        let latest = latest_per_requester(&txs);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].requester, "alice");
        assert_eq!(latest[0].transaction_id, "t3");
        assert_eq!(latest[1].requester, "bob");
        assert_eq!(latest[1].request_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_bridge_state_flags() {
        let state = BridgeState::new(CircuitBreaker::new(1, Duration::from_secs(1)));
        assert!(!state.is_subscribed());
        state.set_subscribed(true);
        assert!(state.is_subscribed());
        assert_eq!(state.ticks(), 0);
    }
}
