//! # Offline Queue Repository
//!
//! Durable FIFO of writes that could not reach the backend.
//!
//! ## Row Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Offline Queue Row Lifecycle                          │
//! │                                                                         │
//! │  enqueue(descriptor)                                                   │
//! │       │                                                                 │
//! │       ├── key unknown          → INSERT, new seq          (Inserted)   │
//! │       ├── key pending/in_flight → return existing row     (Existing)   │
//! │       └── key failed_permanent  → DELETE + INSERT, new seq (Rearmed)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────┐  mark_in_flight  ┌───────────┐   remove(seq)             │
//! │  │ pending  │ ───────────────► │ in_flight │ ────────────► (gone)      │
//! │  └──────────┘                  └─────┬─────┘                            │
//! │       ▲                              │ record_failure                   │
//! │       │      attempts < max          │                                  │
//! │       └──────────────────────────────┤                                  │
//! │                                      │ attempts >= max                  │
//! │                                      ▼                                  │
//! │                           ┌──────────────────┐                          │
//! │                           │ failed_permanent │ ── rearm(key) ──► pending│
//! │                           └──────────────────┘                          │
//! │                                                                         │
//! │  Startup: reset_in_flight() turns every in_flight row back to pending. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every state change is a single statement or a single transaction, so a
//! kill at any point leaves the table consistent.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use unitlink_core::{QueueEntry, QueueStatus, RequestDescriptor, RequestKind};

const COLUMNS: &str = "seq, idempotency_key, procedure, kind, payload, issued_at, \
                       attempts, last_error, enqueued_at, status";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    seq: i64,
    idempotency_key: String,
    procedure: String,
    kind: RequestKind,
    payload: String,
    issued_at: DateTime<Utc>,
    attempts: i64,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
    status: QueueStatus,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_str(&row.payload).map_err(|e| DbError::CorruptRow {
            seq: row.seq,
            reason: format!("payload is not JSON: {}", e),
        })?;
        let attempts = u32::try_from(row.attempts).map_err(|_| DbError::CorruptRow {
            seq: row.seq,
            reason: format!("attempts out of range: {}", row.attempts),
        })?;

        let mut descriptor =
            RequestDescriptor::write_with_key(row.procedure, payload, row.idempotency_key);
        descriptor.kind = row.kind;
        descriptor.issued_at = row.issued_at;

        Ok(QueueEntry {
            seq: row.seq,
            descriptor,
            attempts,
            last_error: row.last_error,
            enqueued_at: row.enqueued_at,
            status: row.status,
        })
    }
}

/// What [`OfflineQueueRepository::enqueue`] did with a descriptor.
#[derive(Debug, Clone)]
pub enum Enqueued {
    /// A new row was appended.
    Inserted(QueueEntry),

    /// A drainable row with the same key already exists; nothing changed.
    Existing(QueueEntry),

    /// A permanently failed row with the same key was moved to the back of
    /// the queue with its attempt count reset.
    Rearmed(QueueEntry),
}

impl Enqueued {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            Enqueued::Inserted(e) | Enqueued::Existing(e) | Enqueued::Rearmed(e) => e,
        }
    }

    pub fn into_entry(self) -> QueueEntry {
        match self {
            Enqueued::Inserted(e) | Enqueued::Existing(e) | Enqueued::Rearmed(e) => e,
        }
    }

    /// Whether the queue grew or changed order.
    pub fn is_new(&self) -> bool {
        !matches!(self, Enqueued::Existing(_))
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub in_flight: u64,
    pub failed_permanent: u64,
}

impl QueueCounts {
    /// Rows a drain would still pick up.
    pub fn drainable(&self) -> u64 {
        self.pending + self.in_flight
    }

    pub fn total(&self) -> u64 {
        self.drainable() + self.failed_permanent
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for offline queue operations.
#[derive(Debug, Clone)]
pub struct OfflineQueueRepository {
    pool: SqlitePool,
}

impl OfflineQueueRepository {
    /// Creates a new OfflineQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OfflineQueueRepository { pool }
    }

    /// Appends a write, deduplicating on its idempotency key.
    ///
    /// Runs in one transaction so two concurrent enqueues of the same key
    /// cannot both insert.
    pub async fn enqueue(&self, descriptor: &RequestDescriptor) -> DbResult<Enqueued> {
        let key = descriptor.key();
        if key.is_empty() {
            return Err(DbError::QueryFailed(format!(
                "cannot enqueue '{}' without an idempotency key",
                descriptor.procedure
            )));
        }

        let mut tx = self.pool.begin().await?;

        let outcome = match fetch_by_key(&mut *tx, key).await? {
            Some(existing) if existing.status.is_drainable() => {
                debug!(seq = existing.seq, key = %key, "Write already queued");
                Enqueued::Existing(existing)
            }
            Some(failed) => {
                sqlx::query("DELETE FROM offline_queue WHERE seq = ?1")
                    .bind(failed.seq)
                    .execute(&mut *tx)
                    .await?;
                let seq = insert_row(&mut *tx, descriptor).await?;
                debug!(old_seq = failed.seq, seq, key = %key, "Re-armed failed write");
                Enqueued::Rearmed(fetch_by_seq(&mut *tx, seq).await?)
            }
            None => {
                let seq = insert_row(&mut *tx, descriptor).await?;
                debug!(seq, key = %key, procedure = %descriptor.procedure, "Queued write");
                Enqueued::Inserted(fetch_by_seq(&mut *tx, seq).await?)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Looks up an entry by idempotency key.
    pub async fn find_by_key(&self, key: &str) -> DbResult<Option<QueueEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_key(&mut *conn, key).await
    }

    /// Looks up an entry by sequence number.
    pub async fn get(&self, seq: i64) -> DbResult<QueueEntry> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_seq(&mut *conn, seq).await
    }

    /// All entries, oldest first, including permanently failed ones.
    pub async fn list_all(&self) -> DbResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> =
            sqlx::query_as(&format!("SELECT {} FROM offline_queue ORDER BY seq ASC", COLUMNS))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    /// Entries a drain may replay, oldest first.
    pub async fn list_drainable(&self) -> DbResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {} FROM offline_queue \
             WHERE status IN ('pending', 'in_flight') ORDER BY seq ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    /// Marks an entry as being replayed.
    pub async fn mark_in_flight(&self, seq: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE offline_queue SET status = ?2 WHERE seq = ?1")
            .bind(seq)
            .bind(QueueStatus::InFlight)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("QueueEntry", seq.to_string()));
        }
        Ok(())
    }

    /// Deletes an entry after the backend accepted it.
    ///
    /// Returns whether a row was removed.
    pub async fn remove(&self, seq: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM offline_queue WHERE seq = ?1")
            .bind(seq)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed replay.
    ///
    /// Increments `attempts`, stores the error and sets the status to
    /// `failed_permanent` once `attempts` reaches `max_attempts`, otherwise
    /// back to `pending`. Returns the updated entry.
    pub async fn record_failure(
        &self,
        seq: i64,
        error: &str,
        max_attempts: u32,
    ) -> DbResult<QueueEntry> {
        let result = sqlx::query(
            r#"
            UPDATE offline_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                status = CASE
                    WHEN attempts + 1 >= ?3 THEN 'failed_permanent'
                    ELSE 'pending'
                END
            WHERE seq = ?1
            "#,
        )
        .bind(seq)
        .bind(error)
        .bind(i64::from(max_attempts))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("QueueEntry", seq.to_string()));
        }

        self.get(seq).await
    }

    /// Moves a permanently failed entry to the back of the queue with its
    /// attempts reset. Returns `None` if no failed entry has this key.
    pub async fn rearm(&self, key: &str) -> DbResult<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await?;

        let failed = match fetch_by_key(&mut *tx, key).await? {
            Some(entry) if entry.status == QueueStatus::FailedPermanent => entry,
            _ => return Ok(None),
        };

        sqlx::query("DELETE FROM offline_queue WHERE seq = ?1")
            .bind(failed.seq)
            .execute(&mut *tx)
            .await?;
        let seq = insert_row(&mut *tx, &failed.descriptor).await?;
        let entry = fetch_by_seq(&mut *tx, seq).await?;

        tx.commit().await?;

        debug!(old_seq = failed.seq, seq, key = %key, "Re-armed failed write");
        Ok(Some(entry))
    }

    /// Re-arms every permanently failed entry, preserving their relative
    /// order. Returns how many were re-armed.
    pub async fn rearm_all_failed(&self) -> DbResult<u64> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT idempotency_key FROM offline_queue \
             WHERE status = 'failed_permanent' ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut count = 0;
        for key in keys {
            if self.rearm(&key).await?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Deletes an entry by key regardless of status.
    pub async fn discard(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM offline_queue WHERE idempotency_key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns every `in_flight` entry to `pending`.
    ///
    /// Called at startup: an entry left in flight by a killed process has
    /// an unknown outcome and must be replayed.
    pub async fn reset_in_flight(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE offline_queue SET status = 'pending' WHERE status = 'in_flight'",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Row counts per status.
    pub async fn counts(&self) -> DbResult<QueueCounts> {
        let rows: Vec<(QueueStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM offline_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            let n = n.max(0) as u64;
            match status {
                QueueStatus::Pending => counts.pending = n,
                QueueStatus::InFlight => counts.in_flight = n,
                QueueStatus::FailedPermanent => counts.failed_permanent = n,
            }
        }
        Ok(counts)
    }
}

// =============================================================================
// Connection-level Helpers
// =============================================================================

async fn insert_row(conn: &mut SqliteConnection, descriptor: &RequestDescriptor) -> DbResult<i64> {
    let payload = serde_json::to_string(&descriptor.payload)?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO offline_queue (
            idempotency_key, procedure, kind, payload, issued_at,
            attempts, last_error, enqueued_at, status
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            0, NULL, ?6, ?7
        )
        "#,
    )
    .bind(descriptor.key())
    .bind(&descriptor.procedure)
    .bind(descriptor.kind)
    .bind(payload)
    .bind(descriptor.issued_at)
    .bind(now)
    .bind(QueueStatus::Pending)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn fetch_by_key(conn: &mut SqliteConnection, key: &str) -> DbResult<Option<QueueEntry>> {
    let row: Option<QueueRow> = sqlx::query_as(&format!(
        "SELECT {} FROM offline_queue WHERE idempotency_key = ?1",
        COLUMNS
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(QueueEntry::try_from).transpose()
}

async fn fetch_by_seq(conn: &mut SqliteConnection, seq: i64) -> DbResult<QueueEntry> {
    let row: Option<QueueRow> =
        sqlx::query_as(&format!("SELECT {} FROM offline_queue WHERE seq = ?1", COLUMNS))
            .bind(seq)
            .fetch_optional(&mut *conn)
            .await?;

    row.ok_or_else(|| DbError::not_found("QueueEntry", seq.to_string()))?
        .try_into()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn repo() -> OfflineQueueRepository {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .offline_queue()
    }

    fn write(procedure: &str, key: &str) -> RequestDescriptor {
        RequestDescriptor::write_with_key(procedure, json!({"name": procedure}), key)
    }

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let repo = repo().await;
        for key in ["k1", "k2", "k3"] {
            assert!(repo.enqueue(&write("createUnit", key)).await.unwrap().is_new());
        }

        let keys: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.idempotency_key().to_string())
            .collect();
        assert_eq!(keys, vec!["k1", "k2", "k3"]);
    }

    #[tokio::test]
    async fn test_enqueue_roundtrips_descriptor() {
        let repo = repo().await;
        let descriptor = RequestDescriptor::write_with_key(
            "updateUnit",
            json!({"id": "unit-004", "status": "maintenance"}),
            "abc",
        );
        let entry = repo.enqueue(&descriptor).await.unwrap().into_entry();

        assert_eq!(entry.procedure(), "updateUnit");
        assert_eq!(entry.descriptor.payload, descriptor.payload);
        assert_eq!(entry.descriptor.kind, RequestKind::Write);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.status, QueueStatus::Pending);
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_deduplicated() {
        let repo = repo().await;
        let first = repo.enqueue(&write("createUnit", "same")).await.unwrap();
        let second = repo.enqueue(&write("createUnit", "same")).await.unwrap();

        assert!(matches!(second, Enqueued::Existing(_)));
        assert_eq!(first.entry().seq, second.entry().seq);
        assert_eq!(repo.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_without_key_fails() {
        let repo = repo().await;
        let mut descriptor = write("createUnit", "x");
        descriptor.idempotency_key = None;
        assert!(repo.enqueue(&descriptor).await.is_err());
    }

    #[tokio::test]
    async fn test_record_failure_reaches_permanent() {
        let repo = repo().await;
        let seq = repo.enqueue(&write("deleteUnit", "d1")).await.unwrap().entry().seq;

        let e = repo.record_failure(seq, "HTTP 503", 2).await.unwrap();
        assert_eq!(e.attempts, 1);
        assert_eq!(e.status, QueueStatus::Pending);
        assert_eq!(e.last_error.as_deref(), Some("HTTP 503"));

        let e = repo.record_failure(seq, "HTTP 503 again", 2).await.unwrap();
        assert_eq!(e.attempts, 2);
        assert_eq!(e.status, QueueStatus::FailedPermanent);

        assert!(repo.list_drainable().await.unwrap().is_empty());
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_key_enqueue_rearms_at_back() {
        let repo = repo().await;
        let failed_seq = repo.enqueue(&write("createUnit", "a")).await.unwrap().entry().seq;
        repo.enqueue(&write("createUnit", "b")).await.unwrap();
        repo.record_failure(failed_seq, "rejected", 1).await.unwrap();

        let again = repo.enqueue(&write("createUnit", "a")).await.unwrap();
        assert!(matches!(again, Enqueued::Rearmed(_)));
        assert!(again.entry().seq > failed_seq);
        assert_eq!(again.entry().attempts, 0);
        assert_eq!(again.entry().status, QueueStatus::Pending);

        let order: Vec<String> = repo
            .list_drainable()
            .await
            .unwrap()
            .iter()
            .map(|e| e.idempotency_key().to_string())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_rearm_ignores_drainable_entries() {
        let repo = repo().await;
        repo.enqueue(&write("createUnit", "p")).await.unwrap();
        assert!(repo.rearm("p").await.unwrap().is_none());
        assert!(repo.rearm("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rearm_all_failed_keeps_relative_order() {
        let repo = repo().await;
        for key in ["x", "y", "z"] {
            let seq = repo.enqueue(&write("createUnit", key)).await.unwrap().entry().seq;
            if key != "y" {
                repo.record_failure(seq, "boom", 1).await.unwrap();
            }
        }

        assert_eq!(repo.rearm_all_failed().await.unwrap(), 2);
        let order: Vec<String> = repo
            .list_drainable()
            .await
            .unwrap()
            .iter()
            .map(|e| e.idempotency_key().to_string())
            .collect();
        assert_eq!(order, vec!["y", "x", "z"]);
    }

    #[tokio::test]
    async fn test_remove_and_discard() {
        let repo = repo().await;
        let seq = repo.enqueue(&write("createUnit", "r")).await.unwrap().entry().seq;
        repo.enqueue(&write("createUnit", "s")).await.unwrap();

        assert!(repo.remove(seq).await.unwrap());
        assert!(!repo.remove(seq).await.unwrap());
        assert!(repo.discard("s").await.unwrap());
        assert!(!repo.discard("s").await.unwrap());
        assert_eq!(repo.counts().await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn test_reset_in_flight() {
        let repo = repo().await;
        let seq = repo.enqueue(&write("createUnit", "f")).await.unwrap().entry().seq;
        repo.mark_in_flight(seq).await.unwrap();
        assert_eq!(repo.counts().await.unwrap().in_flight, 1);

        assert_eq!(repo.reset_in_flight().await.unwrap(), 1);
        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn test_mark_in_flight_missing_row() {
        let repo = repo().await;
        assert!(matches!(
            repo.mark_in_flight(99).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "unitlink-queue-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            db.offline_queue().enqueue(&write("createUnit", "durable")).await.unwrap();
            db.close().await;
        }

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let entries = db.offline_queue().list_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].idempotency_key(), "durable");
        db.close().await;

        let _ = std::fs::remove_file(&path);
    }
}
