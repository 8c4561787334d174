//! Durable dedup store.
//!
//! One row per ledger request id. The `UNIQUE` constraint on `request_id` turns
//! at-least-once reads from the index into effectively-once dispatch: an insert
//! that hits the constraint means another tick (or a previous run) already owns
//! the request, and the caller skips it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Lifecycle of a dedup entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    Pending,
    Completed,
    Failed,
}

/// Request metadata recorded alongside a claim.
///
/// Values are stored as they appear on the ledger, after redaction; the store
/// never sees a raw secret.
#[derive(Debug, Clone, Default)]
pub struct ClaimMetadata {
    pub url: String,
    pub method: String,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub timeout_ms: i64,
}

/// Final state written by [`DedupStore::complete`].
#[derive(Debug, Clone)]
pub struct OutcomeSummary {
    pub status: DedupStatus,
    pub response_id: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl OutcomeSummary {
    pub fn completed(response_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            status: DedupStatus::Completed,
            response_id: Some(response_id.into()),
            summary: Some(summary.into()),
            error: None,
        }
    }

    pub fn failed(response_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status: DedupStatus::Failed,
            response_id,
            summary: None,
            error: Some(error.into()),
        }
    }
}

/// A row of the `relay_requests` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DedupEntry {
    pub id: i64,
    pub request_id: String,
    pub response_id: Option<String>,
    /// Claim time, Unix epoch milliseconds.
    pub timestamp: i64,
    pub url: String,
    pub method: String,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub timeout: i64,
    pub status: String,
    pub outcome_summary: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<i64>,
}

impl DedupEntry {
    pub fn status(&self) -> Option<DedupStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    /// Another caller owns this request id. Not a failure.
    #[error("request already claimed")]
    AlreadyClaimed,

    #[error(transparent)]
    Store(#[from] Error),
}

impl From<sqlx::Error> for ClaimError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.into())
    }
}

/// Dedup store contract.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn has_seen(&self, request_id: &str) -> Result<bool>;

    /// Atomically create the entry for `request_id`, returning its id.
    async fn claim(
        &self,
        request_id: &str,
        metadata: &ClaimMetadata,
    ) -> std::result::Result<i64, ClaimError>;

    /// Move a pending entry to its final state. Completing an entry that was
    /// never claimed, or is no longer pending, is an invariant violation.
    async fn complete(&self, entry_id: i64, summary: &OutcomeSummary) -> Result<()>;

    async fn get(&self, entry_id: i64) -> Result<DedupEntry>;

    /// Entries still `pending`, oldest first.
    async fn list_pending(&self) -> Result<Vec<DedupEntry>>;
}

/// SQLx implementation of [`DedupStore`].
pub struct SqlxDedupStore {
    pool: SqlitePool,
}

impl SqlxDedupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupStore for SqlxDedupStore {
    async fn has_seen(&self, request_id: &str) -> Result<bool> {
        let seen: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM relay_requests WHERE request_id = ?)",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen)
    }

    async fn claim(
        &self,
        request_id: &str,
        metadata: &ClaimMetadata,
    ) -> std::result::Result<i64, ClaimError> {
        let result = retry_on_sqlite_busy("dedup_claim", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO relay_requests
                    (request_id, timestamp, url, method, headers, body, timeout, status)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(request_id) DO NOTHING
                "#,
            )
            .bind(request_id)
            .bind(now_ms())
            .bind(&metadata.url)
            .bind(&metadata.method)
            .bind(&metadata.headers)
            .bind(&metadata.body)
            .bind(metadata.timeout_ms)
            .bind(DedupStatus::Pending.to_string())
            .execute(&self.pool)
            .await?;
            Ok(result)
        })
        .await?;

        if result.rows_affected() == 0 {
            debug!(request_id, "claim lost to an existing entry");
            return Err(ClaimError::AlreadyClaimed);
        }

        Ok(result.last_insert_rowid())
    }

    async fn complete(&self, entry_id: i64, summary: &OutcomeSummary) -> Result<()> {
        if summary.status == DedupStatus::Pending {
            return Err(Error::invariant(format!(
                "entry {entry_id} cannot be completed back into pending"
            )));
        }

        let result = retry_on_sqlite_busy("dedup_complete", || async {
            let result = sqlx::query(
                r#"
                UPDATE relay_requests
                SET status = ?, response_id = ?, outcome_summary = ?, error = ?, completed_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
            )
            .bind(summary.status.to_string())
            .bind(&summary.response_id)
            .bind(&summary.summary)
            .bind(&summary.error)
            .bind(now_ms())
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
            Ok(result)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::invariant(format!(
                "entry {entry_id} was never claimed or is already complete"
            )));
        }

        Ok(())
    }

    async fn get(&self, entry_id: i64) -> Result<DedupEntry> {
        sqlx::query_as::<_, DedupEntry>("SELECT * FROM relay_requests WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("DedupEntry", entry_id.to_string()))
    }

    async fn list_pending(&self) -> Result<Vec<DedupEntry>> {
        let entries = sqlx::query_as::<_, DedupEntry>(
            "SELECT * FROM relay_requests WHERE status = 'pending' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
