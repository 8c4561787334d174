#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ans104::Tag;
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

use relay_bridge::credentials::{CredentialTemplate, SecretBinding};
use relay_bridge::database;
use relay_bridge::dedup::SqlxDedupStore;
use relay_bridge::dispatcher::Dispatcher;
use relay_bridge::ledger::{
    IndexError, LedgerIndex, LedgerTransaction, LedgerWriter, OutgoingMessage,
    TransactionDataSource,
};
use relay_bridge::poller::RequestPipeline;
use relay_bridge::publisher::{PublisherLimits, ResponsePublisher};
use relay_bridge::utils::http_client::build_client;
use relay_bridge::{Error, Result};

pub const RELAY_PROCESS: &str = "relay-proc";
pub const REQUESTER: &str = "requester-proc";
pub const API_KEY: &str = "sk-live-123";
pub const API_KEY_PLACEHOLDER: &str = "{{API_KEY}}";

/// Local upstream the relayed requests are sent to.
pub struct TestServer {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn json_ok(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "temperature": 21, "unit": "C" }))
}

async fn html_not_found(State(hits): State<Arc<AtomicUsize>>) -> Html<&'static str> {
    hits.fetch_add(1, Ordering::SeqCst);
    Html("<!DOCTYPE html><html><body><h1>404 Not Found</h1></body></html>")
}

async fn teapot(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, &'static str) {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::IM_A_TEAPOT, "short and stout")
}

async fn echo_auth(State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({ "authorization": auth }))
}

async fn echo_body(State(hits): State<Arc<AtomicUsize>>, body: String) -> String {
    hits.fetch_add(1, Ordering::SeqCst);
    body
}

async fn slow(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

pub async fn spawn_server() -> TestServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/weather", get(json_ok))
        .route("/missing", get(html_not_found))
        .route("/teapot", get(teapot))
        .route("/auth", get(echo_auth))
        .route("/body", post(echo_body))
        .route("/slow", get(slow))
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// Base URL of a local port nothing listens on.
pub fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Formatted log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Capture this crate's events on the current thread until the guard is
/// dropped.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("relay_bridge=trace")
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

pub async fn temp_store() -> (TempDir, Arc<SqlxDedupStore>) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("relay.db").display());
    let pool = database::init_pool(&url).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    (dir, Arc::new(SqlxDedupStore::new(pool)))
}

pub fn credentials() -> Arc<CredentialTemplate> {
    Arc::new(CredentialTemplate::new(vec![SecretBinding::new(
        "API_KEY",
        API_KEY_PLACEHOLDER,
        Some(API_KEY.to_string()),
    )]))
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(build_client(Duration::from_secs(5)).unwrap())
        .with_credentials(credentials())
}

/// Ledger writer that records every message and hands out sequential ids.
#[derive(Default)]
pub struct RecordingWriter {
    pub messages: Mutex<Vec<OutgoingMessage>>,
}

impl RecordingWriter {
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl LedgerWriter for RecordingWriter {
    async fn send(&self, message: OutgoingMessage) -> Result<String> {
        let mut messages = self.messages.lock();
        messages.push(message);
        Ok(format!("msg-{}", messages.len()))
    }
}

/// Data source serving a fixed body, or failing when none is set.
pub struct FixedDataSource(pub Option<String>);

#[async_trait]
impl TransactionDataSource for FixedDataSource {
    async fn fetch_data(&self, transaction_id: &str) -> Result<String> {
        self.0
            .clone()
            .ok_or_else(|| Error::not_found("transaction data", transaction_id))
    }
}

/// Index returning a scripted answer and counting queries.
pub struct ScriptedIndex {
    name: &'static str,
    pub transactions: Mutex<Option<Vec<LedgerTransaction>>>,
    pub calls: AtomicUsize,
}

impl ScriptedIndex {
    pub fn answering(name: &'static str, transactions: Vec<LedgerTransaction>) -> Self {
        Self {
            name,
            transactions: Mutex::new(Some(transactions)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            transactions: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerIndex for ScriptedIndex {
    fn name(&self) -> &str {
        self.name
    }

    async fn relay_candidates(
        &self,
        _process_id: &str,
        _limit: u32,
    ) -> std::result::Result<Vec<LedgerTransaction>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .lock()
            .clone()
            .ok_or(IndexError::Status(503))
    }
}

/// A relay transaction as the index would return it.
pub fn relay_tx(
    tx_id: &str,
    reference: &str,
    url: &str,
    extra: &[(&str, &str)],
) -> LedgerTransaction {
    let mut tags = vec![
        Tag::new("Action", "Relay-Response"),
        Tag::new("Status", "Success"),
        Tag::new("Data-Protocol", "ao"),
        Tag::new("URL", url),
        Tag::new("Method", "GET"),
        Tag::new("Requestor", REQUESTER),
        Tag::new("Reference", reference),
    ];
    for (name, value) in extra {
        tags.retain(|t| t.name != *name);
        tags.push(Tag::new(*name, *value));
    }

    LedgerTransaction {
        id: tx_id.to_string(),
        block_height: Some(1000),
        block_timestamp: Some(1_700_000_000),
        data_size: 0,
        tags,
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub store: Arc<SqlxDedupStore>,
    pub writer: Arc<RecordingWriter>,
    pub pipeline: Arc<RequestPipeline>,
}

pub async fn harness(data: Option<String>) -> Harness {
    let (dir, store) = temp_store().await;
    let writer = Arc::new(RecordingWriter::default());
    let credentials = credentials();
    let publisher = Arc::new(ResponsePublisher::new(
        writer.clone(),
        credentials.clone(),
        RELAY_PROCESS,
        PublisherLimits::default(),
    ));
    let pipeline = Arc::new(RequestPipeline::new(
        store.clone(),
        credentials,
        Arc::new(dispatcher()),
        publisher,
        Arc::new(FixedDataSource(data)),
    ));

    Harness {
        _dir: dir,
        store,
        writer,
        pipeline,
    }
}
