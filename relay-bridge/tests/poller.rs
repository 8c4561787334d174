mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use relay_bridge::ledger::LedgerIndex;
use relay_bridge::poller::{BridgeState, CircuitBreaker, CircuitState, LedgerPoller, PollerConfig};

use common::{RELAY_PROCESS, ScriptedIndex, harness, relay_tx, spawn_server};

fn config() -> PollerConfig {
    PollerConfig {
        relay_process_id: RELAY_PROCESS.to_string(),
        query_limit: 100,
        interval: Duration::from_millis(20),
    }
}

fn state(threshold: u32) -> Arc<BridgeState> {
    Arc::new(BridgeState::new(CircuitBreaker::new(
        threshold,
        Duration::from_secs(60),
    )))
}

#[tokio::test]
async fn test_fallback_answers_when_primary_fails() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let primary = Arc::new(ScriptedIndex::failing("primary"));
    let fallback = Arc::new(ScriptedIndex::answering(
        "fallback",
        vec![relay_tx("tx-1", "r1", &server.url("/weather"), &[])],
    ));
    let poller = LedgerPoller::new(
        primary.clone(),
        Some(fallback.clone() as Arc<dyn LedgerIndex>),
        h.pipeline.clone(),
        state(3),
        config(),
    );

    let report = poller.tick().await.unwrap();

    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(report.fetched, 1);
    assert_eq!(report.published, 1);
    assert_eq!(poller.state().breaker.failure_count(), 0);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_breaker_opens_after_repeated_failures() {
    let h = harness(None).await;
    let primary = Arc::new(ScriptedIndex::failing("primary"));
    let fallback = Arc::new(ScriptedIndex::failing("fallback"));
    let poller = LedgerPoller::new(
        primary.clone(),
        Some(fallback.clone() as Arc<dyn LedgerIndex>),
        h.pipeline.clone(),
        state(2),
        config(),
    );

    assert!(poller.tick().await.is_err());
    assert_eq!(poller.state().breaker.failure_count(), 1);
    assert_eq!(poller.state().breaker.state(), CircuitState::Closed);

    assert!(poller.tick().await.is_err());
    assert_eq!(poller.state().breaker.state(), CircuitState::Open);

    let report = poller.tick().await.unwrap();
    assert!(report.suspended);
    assert_eq!(primary.calls(), 2);
    assert_eq!(fallback.calls(), 2);
}

#[tokio::test]
async fn test_duplicates_in_one_batch_are_relayed_once() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let url = server.url("/weather");
    let primary = Arc::new(ScriptedIndex::answering(
        "primary",
        vec![
            relay_tx("tx-2", "dup", &url, &[]),
            relay_tx("tx-1", "dup", &url, &[]),
            relay_tx("tx-0", "", &url, &[]),
        ],
    ));
    let poller = LedgerPoller::new(primary, None, h.pipeline.clone(), state(3), config());

    let report = poller.tick().await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.candidates, 2);
    assert_eq!(report.published, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(server.hits(), 1);
    assert_eq!(h.writer.sent().len(), 1);
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let primary = Arc::new(ScriptedIndex::answering(
        "primary",
        vec![relay_tx("tx-1", "r1", &server.url("/weather"), &[])],
    ));
    let poller = Arc::new(LedgerPoller::new(
        primary,
        None,
        h.pipeline.clone(),
        state(3),
        config(),
    ));
    let cancel = CancellationToken::new();

    let task = {
        let poller = poller.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert!(poller.state().ticks() >= 2);
    assert_eq!(poller.state().dispatched(), 1);
    assert_eq!(server.hits(), 1);
}
