mod common;

use std::sync::Arc;

use tokio::task::JoinSet;

use relay_bridge::dedup::{DedupStatus, DedupStore};
use relay_bridge::ledger::RequestRecord;
use relay_bridge::poller::{ProcessOutcome, SkipReason};

use common::{
    API_KEY, API_KEY_PLACEHOLDER, REQUESTER, capture_logs, harness, relay_tx, spawn_server,
    unreachable_base_url,
};

fn record(tx_id: &str, reference: &str, url: &str, extra: &[(&str, &str)]) -> RequestRecord {
    RequestRecord::from_transaction(&relay_tx(tx_id, reference, url, extra)).unwrap()
}

#[tokio::test]
async fn test_request_is_relayed_and_answered() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let record = record("tx-abc", "abc", &server.url("/weather"), &[("X-Trace", "t-1")]);

    let outcome = h.pipeline.process(&record).await.unwrap();

    let ProcessOutcome::Published {
        entry_id,
        response_id,
        success,
    } = outcome
    else {
        panic!("expected a published response, got {outcome:?}");
    };
    assert!(success);
    assert_eq!(response_id, "msg-1");

    let sent = h.writer.sent();
    assert_eq!(sent.len(), 1);
    let message = &sent[0];
    assert_eq!(message.target, common::RELAY_PROCESS);
    assert_eq!(message.tag_value("Action"), Some("axios-response"));
    assert_eq!(message.tag_value("Status"), Some("Success"));
    assert_eq!(message.tag_value("RequestId"), Some(entry_id.to_string().as_str()));
    assert_eq!(message.tag_value("Requestor"), Some(REQUESTER));
    assert_eq!(message.tag_value("Optimized"), Some("true"));
    assert_eq!(message.tag_value("X-Trace"), Some("t-1"));

    let body = String::from_utf8(message.data.clone()).unwrap();
    assert!(body.starts_with(r#"{"status":200"#), "unexpected body {body}");
    assert!(body.contains(r#""success":true"#));

    let entry = h.store.get(entry_id).await.unwrap();
    assert_eq!(entry.request_id, "abc");
    assert_eq!(entry.status(), Some(DedupStatus::Completed));
    assert_eq!(entry.response_id.as_deref(), Some("msg-1"));
    assert!(entry.completed_at.is_some());
}

#[tokio::test]
async fn test_same_request_is_relayed_once() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let record = record("tx-1", "once", &server.url("/weather"), &[]);

    assert!(matches!(
        h.pipeline.process(&record).await.unwrap(),
        ProcessOutcome::Published { .. }
    ));
    assert_eq!(
        h.pipeline.process(&record).await.unwrap(),
        ProcessOutcome::Skipped(SkipReason::AlreadySeen)
    );

    assert_eq!(server.hits(), 1);
    assert_eq!(h.writer.sent().len(), 1);
}

#[tokio::test]
async fn test_concurrent_processing_dispatches_once() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let record = Arc::new(record("tx-1", "race", &server.url("/weather"), &[]));

    let mut set = JoinSet::new();
    for _ in 0..6 {
        let pipeline = h.pipeline.clone();
        let record = record.clone();
        set.spawn(async move { pipeline.process(&record).await.unwrap() });
    }

    let mut published = 0;
    while let Some(result) = set.join_next().await {
        match result.unwrap() {
            ProcessOutcome::Published { .. } => published += 1,
            ProcessOutcome::Skipped(_) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(published, 1);
    assert_eq!(server.hits(), 1);
    assert_eq!(h.writer.sent().len(), 1);
}

#[tokio::test]
async fn test_secrets_are_substituted_and_redacted() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let headers = format!(r#"{{"Authorization":"Bearer {API_KEY_PLACEHOLDER}"}}"#);
    let record = record("tx-1", "secret", &server.url("/auth"), &[("Headers", &headers)]);

    let ProcessOutcome::Published { entry_id, .. } = h.pipeline.process(&record).await.unwrap()
    else {
        panic!("expected a published response");
    };

    let body = String::from_utf8(h.writer.sent()[0].data.clone()).unwrap();
    assert!(!body.contains(API_KEY), "secret leaked: {body}");
    assert!(body.contains(&format!("Bearer {API_KEY_PLACEHOLDER}")));

    let entry = h.store.get(entry_id).await.unwrap();
    assert!(!entry.headers.unwrap_or_default().contains(API_KEY));
    assert!(!entry.outcome_summary.unwrap_or_default().contains(API_KEY));
}

#[tokio::test]
async fn test_body_from_data_section() {
    let server = spawn_server().await;
    let h = harness(Some(format!("hello {API_KEY_PLACEHOLDER}"))).await;
    let mut tx = relay_tx(
        "tx-data",
        "data",
        &server.url("/body"),
        &[("Method", "POST"), ("Body-Source", "Data-Field")],
    );
    tx.data_size = 32;
    let record = RequestRecord::from_transaction(&tx).unwrap();

    let outcome = h.pipeline.process(&record).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Published { success: true, .. }));

    let body = String::from_utf8(h.writer.sent()[0].data.clone()).unwrap();
    assert!(body.contains(&format!("hello {API_KEY_PLACEHOLDER}")));
    assert!(!body.contains(API_KEY));
}

#[tokio::test]
async fn test_data_section_failure_abandons_request() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let mut tx = relay_tx(
        "tx-data",
        "nodata",
        &server.url("/body"),
        &[("Method", "POST"), ("Body-Source", "Data-Field")],
    );
    tx.data_size = 32;
    let record = RequestRecord::from_transaction(&tx).unwrap();

    let ProcessOutcome::Abandoned { entry_id, .. } = h.pipeline.process(&record).await.unwrap()
    else {
        panic!("expected the request to be abandoned");
    };

    assert_eq!(server.hits(), 0);
    assert!(h.writer.sent().is_empty());
    let entry = h.store.get(entry_id).await.unwrap();
    assert_eq!(entry.status(), Some(DedupStatus::Failed));
    assert!(entry.error.is_some());
    assert!(h.store.list_pending().await.unwrap().is_empty());

    // A failed entry is never retried.
    assert_eq!(
        h.pipeline.process(&record).await.unwrap(),
        ProcessOutcome::Skipped(SkipReason::AlreadySeen)
    );
}

#[tokio::test]
async fn test_missing_requester_abandons_request() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let record = record("tx-1", "orphan", &server.url("/weather"), &[("Requestor", "")]);

    assert!(matches!(
        h.pipeline.process(&record).await.unwrap(),
        ProcessOutcome::Abandoned { .. }
    ));
    assert_eq!(server.hits(), 0);
    assert!(h.writer.sent().is_empty());
}

#[tokio::test]
async fn test_upstream_error_is_published_as_error() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let record = record("tx-1", "teapot", &server.url("/teapot"), &[]);

    let ProcessOutcome::Published {
        entry_id, success, ..
    } = h.pipeline.process(&record).await.unwrap()
    else {
        panic!("expected a published error");
    };
    assert!(!success);

    let message = &h.writer.sent()[0];
    assert_eq!(message.tag_value("Status"), Some("Error"));
    assert_eq!(message.tag_value("IsErrorResponse"), Some("false"));
    assert!(message.tag_value("Optimized").is_none());

    let entry = h.store.get(entry_id).await.unwrap();
    assert_eq!(entry.status(), Some(DedupStatus::Failed));
    assert!(entry.error.unwrap_or_default().contains("HTTP 418"));
}

#[tokio::test]
async fn test_soft_error_is_flagged() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let record = record("tx-1", "soft", &server.url("/missing"), &[]);

    h.pipeline.process(&record).await.unwrap();

    let message = &h.writer.sent()[0];
    assert_eq!(message.tag_value("Status"), Some("Error"));
    assert_eq!(message.tag_value("IsErrorResponse"), Some("true"));
    let body: serde_json::Value = serde_json::from_slice(&message.data).unwrap();
    assert_eq!(body["error"], "Error response detected");
    assert_eq!(body["originalStatus"], 200);
}

#[tokio::test]
async fn test_secrets_never_reach_logs() {
    let server = spawn_server().await;
    let h = harness(None).await;
    let headers = format!(r#"{{"Authorization":"Bearer {API_KEY_PLACEHOLDER}"}}"#);
    let unreachable = record(
        "tx-1",
        "log-transport",
        &format!("{}/weather?appid={API_KEY_PLACEHOLDER}", unreachable_base_url()),
        &[("Headers", &headers)],
    );
    let upstream_error = record(
        "tx-2",
        "log-upstream",
        &server.url(&format!("/teapot?appid={API_KEY_PLACEHOLDER}")),
        &[("Headers", &headers)],
    );

    let (logs, _guard) = capture_logs();
    for record in [&unreachable, &upstream_error] {
        let outcome = h.pipeline.process(record).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Published { success: false, .. }));
    }

    let output = logs.contents();
    assert!(output.contains("request failed"));
    assert!(output.contains("upstream responded"));
    assert!(!output.contains(API_KEY), "secret written to logs:\n{output}");
    for message in h.writer.sent() {
        assert!(!String::from_utf8_lossy(&message.data).contains(API_KEY));
    }
}
