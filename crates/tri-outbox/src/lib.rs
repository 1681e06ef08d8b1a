// SPDX-License-Identifier: MIT OR Apache-2.0
//! The outbox publisher sidecar (§4.3): polls the relational store's
//! outbox table and republishes every `PENDING` row exactly once,
//! co-located with workers so the relational store stays local.
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, warn};
use tri_core::OutboxRow;
use tri_store::{RelationalStore, StoreError};

/// Where a published outbox row ends up. Implemented by whatever
/// downstream consumer owns the event type (`tri-workers`' validation
/// worker, for `analysis-finding`).
#[async_trait]
pub trait FindingSink: Send + Sync {
    /// Delivers one outbox row's payload. An `Err` leaves the row
    /// `PENDING` for the next tick, up to `max_failures`.
    async fn publish(&self, event_type: &str, payload: &serde_json::Value) -> Result<(), PublishError>;
}

/// A publish attempt failed. Opaque to the publisher: every failure is
/// treated the same regardless of cause (§4.3 has no retry taxonomy of
/// its own, only poll-again-next-tick).
#[derive(Debug, thiserror::Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// Outcome of one poll pass, reported for logging/testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Rows successfully published this pass.
    pub published: usize,
    /// Rows that failed to publish this pass (still `PENDING` or now `FAILED`).
    pub failed: usize,
}

/// Polls for `PENDING` outbox rows and republishes them in id order.
pub struct OutboxPublisher {
    store: Arc<RelationalStore>,
    sink: Arc<dyn FindingSink>,
    batch_size: u32,
    max_failures: u32,
    poll_interval: Duration,
}

impl OutboxPublisher {
    /// Builds a publisher. `max_failures` is the `M` in §4.3's
    /// "after M failures mark FAILED".
    #[must_use]
    pub fn new(store: Arc<RelationalStore>, sink: Arc<dyn FindingSink>, batch_size: u32, max_failures: u32, poll_interval: Duration) -> Self {
        Self {
            store,
            sink,
            batch_size,
            max_failures,
            poll_interval,
        }
    }

    /// Runs one poll pass: fetches up to `batch_size` `PENDING` rows in
    /// id order and publishes each in turn. Idempotent — a row already
    /// published by a prior tick is simply absent from the next batch.
    pub async fn tick(&self) -> Result<PollOutcome, StoreError> {
        let rows = self.store.outbox_pending(self.batch_size)?;
        let mut outcome = PollOutcome::default();
        for row in rows {
            self.publish_one(&row, &mut outcome).await?;
        }
        Ok(outcome)
    }

    async fn publish_one(&self, row: &OutboxRow, outcome: &mut PollOutcome) -> Result<(), StoreError> {
        match self.sink.publish(&row.event_type, &row.payload).await {
            Ok(()) => {
                self.store.mark_outbox_published(row.id)?;
                outcome.published += 1;
                debug!(outbox_id = row.id, event_type = %row.event_type, "published outbox row");
            }
            Err(e) => {
                self.store.record_outbox_publish_failure(row.id, self.max_failures)?;
                outcome.failed += 1;
                warn!(outbox_id = row.id, event_type = %row.event_type, error = %e, "outbox publish failed");
            }
        }
        Ok(())
    }

    /// Runs the poll loop until `shutdown` reports `true`, at
    /// `poll_interval` cadence. Intended to be spawned as its own task
    /// alongside the worker pool (§4.3 "runs co-located with workers").
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "outbox poll tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tri_core::Evidence;

    struct RecordingSink {
        delivered: Mutex<Vec<(String, serde_json::Value)>>,
        fail_first_n: AtomicUsize,
    }

    impl RecordingSink {
        fn new(fail_first_n: usize) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail_first_n: AtomicUsize::new(fail_first_n),
            }
        }
    }

    #[async_trait]
    impl FindingSink for RecordingSink {
        async fn publish(&self, event_type: &str, payload: &serde_json::Value) -> Result<(), PublishError> {
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err(PublishError("simulated transport failure".to_string()));
            }
            self.delivered.lock().unwrap().push((event_type.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn seed_row(store: &RelationalStore, hash: &str) {
        let evidence = Evidence::new("run-1", &format!("job-{hash}"), hash, tri_core::WorkerKind::File, 0.9, serde_json::json!({"hash": hash}), chrono::Utc::now());
        store.insert_evidence_with_outbox(&evidence, OutboxRow::ANALYSIS_FINDING, &serde_json::json!({"run_id": "run-1", "relationship_hash": hash})).unwrap();
    }

    #[tokio::test]
    async fn tick_publishes_every_pending_row_in_order() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        seed_row(&store, "hash-a");
        seed_row(&store, "hash-b");
        let sink = Arc::new(RecordingSink::new(0));
        let publisher = OutboxPublisher::new(store.clone(), sink.clone(), 10, 3, Duration::from_millis(1));

        let outcome = publisher.tick().await.unwrap();
        assert_eq!(outcome.published, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(store.outbox_pending(10).unwrap().len(), 0, "published rows must not be redelivered");
        assert_eq!(sink.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_publish_leaves_row_pending_for_the_next_tick() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        seed_row(&store, "hash-a");
        let sink = Arc::new(RecordingSink::new(1));
        let publisher = OutboxPublisher::new(store.clone(), sink.clone(), 10, 3, Duration::from_millis(1));

        let first = publisher.tick().await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(store.outbox_pending(10).unwrap().len(), 1, "below max_failures, row stays pending");

        let second = publisher.tick().await.unwrap();
        assert_eq!(second.published, 1);
        assert_eq!(store.outbox_pending(10).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn row_is_marked_failed_after_max_failures() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        seed_row(&store, "hash-a");
        let sink = Arc::new(RecordingSink::new(10));
        let publisher = OutboxPublisher::new(store.clone(), sink, 10, 2, Duration::from_millis(1));

        publisher.tick().await.unwrap();
        assert_eq!(store.outbox_pending(10).unwrap().len(), 1);
        publisher.tick().await.unwrap();
        assert_eq!(store.outbox_pending(10).unwrap().len(), 0, "second failure hit max_failures, row is now FAILED not PENDING");
    }

    #[tokio::test]
    async fn run_stops_promptly_on_shutdown_signal() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new(0));
        let publisher = OutboxPublisher::new(store, sink, 10, 3, Duration::from_millis(5));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            publisher.run(rx).await;
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
