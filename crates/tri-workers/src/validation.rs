//! Validation worker (§4.4): O(1) per `analysis-finding` event, never
//! touching the relational store.

use std::sync::Arc;

use tri_cache::Cache;
use tri_core::{ErrorCode, Job, TriError};
use tri_queue::JobQueue;

use crate::reconcile_job;

/// One `analysis-finding` event, as carried in an outbox row's payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AnalysisFinding {
    pub run_id: String,
    pub relationship_hash: String,
}

/// Consumes `analysis-finding` events and enqueues exactly one
/// `reconcile-relationship` job per hash once `received == expected`.
pub struct ValidationWorker {
    cache: Arc<dyn Cache>,
    queue: Arc<dyn JobQueue>,
}

impl ValidationWorker {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, queue: Arc<dyn JobQueue>) -> Self {
        Self { cache, queue }
    }

    /// Processes one event. Returns the terminal outcome the outbox
    /// publisher or consumer loop should report.
    pub async fn process_event(&self, payload: &serde_json::Value) -> Result<(), TriError> {
        let finding: AnalysisFinding = serde_json::from_value(payload.clone()).map_err(|e| TriError::InvalidPayload {
            code: ErrorCode::MissingRequiredField,
            message: format!("malformed analysis-finding payload: {e}"),
        })?;

        let (received, expected) = self
            .cache
            .incr_and_read(&finding.run_id, &finding.relationship_hash)
            .await
            .map_err(TriError::from)?;

        if received < expected {
            return Ok(());
        }
        if received > expected {
            // Logged, never retried: a worker raised the expectation
            // after this counter had already reached the old ceiling.
            tracing::warn!(
                run_id = %finding.run_id,
                hash = %finding.relationship_hash,
                received,
                expected,
                "evidence counter exceeded expectation"
            );
            return Ok(());
        }

        let newly_marked = self.cache.mark_reconciled(&finding.run_id, &finding.relationship_hash).await.map_err(TriError::from)?;
        if newly_marked {
            let job: Job = reconcile_job(&finding.run_id, &finding.relationship_hash);
            self.queue.enqueue(job).await.map_err(TriError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tri_cache::MemoryCache;
    use tri_queue::{MemoryJobQueue, RetryPolicy};

    fn finding_payload(run_id: &str, hash: &str) -> serde_json::Value {
        serde_json::json!({ "run_id": run_id, "relationship_hash": hash })
    }

    #[tokio::test]
    async fn enqueues_reconcile_exactly_once_at_threshold() {
        let cache = Arc::new(MemoryCache::new());
        cache.seed_expectation("run-1", "hash-a", 2).await.unwrap();
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default()));
        let worker = ValidationWorker::new(cache, queue.clone());

        worker.process_event(&finding_payload("run-1", "hash-a")).await.unwrap();
        assert!(queue.dequeue("reconcile-relationship").await.unwrap().is_none());

        worker.process_event(&finding_payload("run-1", "hash-a")).await.unwrap();
        assert!(queue.dequeue("reconcile-relationship").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn redelivery_past_threshold_does_not_double_enqueue() {
        let cache = Arc::new(MemoryCache::new());
        cache.seed_expectation("run-1", "hash-a", 1).await.unwrap();
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default()));
        let worker = ValidationWorker::new(cache, queue.clone());

        worker.process_event(&finding_payload("run-1", "hash-a")).await.unwrap();
        worker.process_event(&finding_payload("run-1", "hash-a")).await.unwrap();

        assert!(queue.dequeue("reconcile-relationship").await.unwrap().is_some());
        assert!(queue.dequeue("reconcile-relationship").await.unwrap().is_none(), "single-enqueue guard must hold under redelivery");
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_payload() {
        let cache = Arc::new(MemoryCache::new());
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default()));
        let worker = ValidationWorker::new(cache, queue);
        let err = worker.process_event(&serde_json::json!({"nonsense": true})).await.unwrap_err();
        assert!(matches!(err, TriError::InvalidPayload { .. }));
    }
}
