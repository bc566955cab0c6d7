//! # Offline Queue
//!
//! Durable FIFO of writes issued while the backend could not take them,
//! replayed in order once connectivity returns.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Offline Queue Drain                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    offline_queue Table                          │   │
//! │  │                                                                 │   │
//! │  │  seq | idempotency_key | procedure  | attempts | status        │   │
//! │  │  ────┼─────────────────┼────────────┼──────────┼───────────────│   │
//! │  │  1   │ 9f2c...         │ updateUnit │ 0        │ pending       │   │
//! │  │  2   │ 41ab...         │ createUnit │ 2        │ pending       │   │
//! │  │  3   │ c07e...         │ deleteUnit │ 5        │ failed_perm.  │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │ ascending seq, drainable only           │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  for each entry:                                                │   │
//! │  │    1. mark in_flight                                            │   │
//! │  │    2. LiveCaller::call (timeout + retry, same idempotency key)  │   │
//! │  │    3. ok          → delete row                                  │   │
//! │  │       failure     → attempts += 1, last_error = ...             │   │
//! │  │         at ceiling  → failed_permanent, continue                │   │
//! │  │         unreachable → stop the pass (order is kept)             │   │
//! │  │         rejected    → continue with the next entry              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  One drain at a time: a second caller gets `already_running`.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use unitlink_core::{Policy, QueueEntry, QueueStatus, RequestDescriptor};
use unitlink_db::{Database, DbError, Enqueued, OfflineQueueRepository, QueueCounts};

use crate::error::{LinkError, LinkResult};
use crate::live::LiveCaller;

// =============================================================================
// Drain Report
// =============================================================================

/// Outcome of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Entries the backend accepted and that were removed.
    pub replayed: u32,

    /// Entries the backend refused that still have attempts left.
    pub rejected: u32,

    /// Entries that reached the attempt ceiling during this pass.
    pub failed_permanent: u32,

    /// Every failure of this pass, in replay order.
    pub failures: Vec<LinkError>,

    /// The pass stopped at an unreachable backend before the queue end.
    pub stopped_early: bool,

    /// Another drain was already running; this one did nothing.
    pub already_running: bool,

    /// Drainable entries left after the pass.
    pub remaining: u64,
}

impl DrainReport {
    pub fn already_running() -> Self {
        DrainReport {
            already_running: true,
            ..Default::default()
        }
    }

    /// True if the pass touched nothing.
    pub fn is_noop(&self) -> bool {
        self.replayed == 0 && self.rejected == 0 && self.failed_permanent == 0 && !self.stopped_early
    }

    /// Display strings of every failure.
    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.iter().map(|e| e.to_string()).collect()
    }
}

// =============================================================================
// Offline Queue
// =============================================================================

/// Durable write queue with deduplication and ordered replay.
pub struct OfflineQueue {
    repo: OfflineQueueRepository,
    policy: Arc<Policy>,
    drain_lock: Mutex<()>,
}

impl OfflineQueue {
    /// Opens the queue on `db`.
    ///
    /// Entries left `in_flight` by a previous process have an unknown
    /// outcome; they go back to `pending` and are replayed with the same
    /// idempotency key.
    pub async fn open(db: &Database, policy: Arc<Policy>) -> LinkResult<Self> {
        let repo = db.offline_queue();

        let recovered = repo.reset_in_flight().await?;
        if recovered > 0 {
            warn!(recovered, "Recovered interrupted queue entries");
        }

        let counts = repo.counts().await?;
        info!(
            pending = counts.pending,
            failed_permanent = counts.failed_permanent,
            "Offline queue opened"
        );

        Ok(OfflineQueue {
            repo,
            policy,
            drain_lock: Mutex::new(()),
        })
    }

    /// Records a write for later replay.
    ///
    /// A key already PENDING or IN_FLIGHT returns the existing entry
    /// untouched. A key that FAILED_PERMANENT is re-armed at the back of the
    /// queue with its attempts reset.
    ///
    /// ## Errors
    /// - [`LinkError::InvalidRequest`] for reads or writes without a key
    /// - [`LinkError::QueueFull`] if the configured cap is reached
    pub async fn enqueue(&self, descriptor: &RequestDescriptor) -> LinkResult<QueueEntry> {
        if !descriptor.is_write() || descriptor.key().is_empty() {
            return Err(LinkError::InvalidRequest {
                procedure: descriptor.procedure.clone(),
                reason: "only writes with an idempotency key can be queued".into(),
            });
        }

        if let Some(limit) = self.policy.max_queue_len() {
            let known = self.repo.find_by_key(descriptor.key()).await?.is_some();
            if !known && self.repo.counts().await?.total() >= limit as u64 {
                warn!(limit, procedure = %descriptor.procedure, "Offline queue is full");
                return Err(LinkError::QueueFull { limit });
            }
        }

        let outcome = self.repo.enqueue(descriptor).await?;

        if outcome.is_new() {
            let total = self.repo.counts().await?.total();
            if total > self.policy.queue_warn_threshold() as u64 {
                warn!(
                    total,
                    threshold = self.policy.queue_warn_threshold(),
                    "Offline queue is growing"
                );
            }
        }

        match &outcome {
            Enqueued::Inserted(entry) => {
                info!(seq = entry.seq, procedure = %entry.procedure(), "Write queued");
            }
            Enqueued::Rearmed(entry) => {
                info!(seq = entry.seq, procedure = %entry.procedure(), "Failed write re-submitted");
            }
            Enqueued::Existing(entry) => {
                debug!(seq = entry.seq, "Duplicate enqueue ignored");
            }
        }

        Ok(outcome.into_entry())
    }

    /// Every entry, oldest first, including permanently failed ones.
    pub async fn list(&self) -> LinkResult<Vec<QueueEntry>> {
        Ok(self.repo.list_all().await?)
    }

    /// Entries a drain would still replay.
    pub async fn pending_count(&self) -> LinkResult<u64> {
        Ok(self.repo.counts().await?.drainable())
    }

    pub async fn counts(&self) -> LinkResult<QueueCounts> {
        Ok(self.repo.counts().await?)
    }

    /// Removes an entry on explicit caller request, whatever its status.
    pub async fn discard(&self, key: &str) -> LinkResult<()> {
        if self.repo.discard(key).await? {
            info!(key = %key, "Queued write discarded");
            Ok(())
        } else {
            Err(LinkError::NotQueued(key.to_string()))
        }
    }

    /// Re-arms one FAILED_PERMANENT entry.
    pub async fn retry_failed(&self, key: &str) -> LinkResult<QueueEntry> {
        match self.repo.rearm(key).await? {
            Some(entry) => {
                info!(key = %key, seq = entry.seq, "Failed write re-armed");
                Ok(entry)
            }
            None => Err(LinkError::NotQueued(key.to_string())),
        }
    }

    /// Re-arms every FAILED_PERMANENT entry. Returns how many.
    pub async fn retry_all_failed(&self) -> LinkResult<u64> {
        let count = self.repo.rearm_all_failed().await?;
        if count > 0 {
            info!(count, "Failed writes re-armed");
        }
        Ok(count)
    }

    /// True while a drain pass holds the lock.
    pub fn is_draining(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    /// Replays drainable entries in ascending `seq` through `live`.
    ///
    /// Each entry is attempted at most once per pass. Entries enqueued
    /// while the pass runs are picked up before it ends.
    pub async fn drain(&self, live: &LiveCaller) -> LinkResult<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already running");
            return Ok(DrainReport::already_running());
        };

        let max_attempts = self.policy.max_drain_attempts();
        let mut report = DrainReport::default();
        let mut after_seq = 0i64;

        'pass: loop {
            let batch: Vec<QueueEntry> = self
                .repo
                .list_drainable()
                .await?
                .into_iter()
                .filter(|entry| entry.seq > after_seq)
                .collect();

            if batch.is_empty() {
                break;
            }

            info!(count = batch.len(), "Draining offline queue");

            for entry in batch {
                after_seq = entry.seq;

                match self.repo.mark_in_flight(entry.seq).await {
                    Ok(()) => {}
                    // Discarded while the pass was running
                    Err(DbError::NotFound { .. }) => continue,
                    Err(e) => return Err(e.into()),
                }

                match live.call(&entry.descriptor).await {
                    Ok(_) => {
                        self.repo.remove(entry.seq).await?;
                        report.replayed += 1;
                        info!(seq = entry.seq, procedure = %entry.procedure(), "Queued write replayed");
                    }
                    Err(e) => {
                        let updated = match self
                            .repo
                            .record_failure(entry.seq, &e.to_string(), max_attempts)
                            .await
                        {
                            Ok(updated) => updated,
                            Err(DbError::NotFound { .. }) => continue,
                            Err(db) => return Err(db.into()),
                        };

                        if updated.status == QueueStatus::FailedPermanent {
                            warn!(
                                seq = updated.seq,
                                procedure = %updated.procedure(),
                                attempts = updated.attempts,
                                error = %e,
                                "Queued write failed permanently"
                            );
                            report.failed_permanent += 1;
                            report.failures.push(LinkError::FailedPermanent {
                                key: updated.idempotency_key().to_string(),
                                attempts: updated.attempts,
                                last_error: e.to_string(),
                            });
                            continue;
                        }

                        if e.is_unreachable() {
                            warn!(
                                seq = updated.seq,
                                attempts = updated.attempts,
                                error = %e,
                                "Backend unreachable, stopping drain"
                            );
                            report.stopped_early = true;
                            report.failures.push(e);
                            break 'pass;
                        }

                        warn!(
                            seq = updated.seq,
                            attempts = updated.attempts,
                            error = %e,
                            "Queued write rejected"
                        );
                        report.rejected += 1;
                        report.failures.push(e);
                    }
                }
            }
        }

        report.remaining = self.repo.counts().await?.drainable();

        if !report.is_noop() {
            info!(
                replayed = report.replayed,
                rejected = report.rejected,
                failed_permanent = report.failed_permanent,
                remaining = report.remaining,
                stopped_early = report.stopped_early,
                "Drain finished"
            );
        }

        Ok(report)
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("max_drain_attempts", &self.policy.max_drain_attempts())
            .field("max_queue_len", &self.policy.max_queue_len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
