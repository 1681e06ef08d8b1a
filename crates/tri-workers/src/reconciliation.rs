//! Reconciliation worker (§4.5): consolidates evidence for one
//! relationship hash into a single validated-or-rejected verdict.

use std::sync::Arc;

use chrono::Utc;
use tri_config::PipelineConfig;
use tri_core::{ReconciliationStatus, TriError, ValidatedRelationship};
use tri_store::RelationalStore;

/// Errors specific to reconciliation's payload decoding.
fn missing_field(field: &str) -> TriError {
    TriError::InvalidPayload {
        code: tri_core::ErrorCode::MissingRequiredField,
        message: format!("reconcile job payload missing \"{field}\""),
    }
}

/// Consumes `reconcile-relationship` jobs. Idempotent: redelivery after
/// the evidence rows are already deleted is treated as success (§4.5
/// "Redelivery").
pub struct ReconciliationWorker {
    store: Arc<RelationalStore>,
    config: PipelineConfig,
}

impl ReconciliationWorker {
    #[must_use]
    pub fn new(store: Arc<RelationalStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Reconciles one `(run_id, relationship_hash)`.
    pub fn reconcile(&self, run_id: &str, hash: &str) -> Result<(), TriError> {
        let evidence = self.store.evidence_for_hash(run_id, hash).map_err(TriError::from)?;
        if evidence.is_empty() {
            // Already reconciled and cleaned up by a previous (possibly
            // redelivered) attempt.
            return Ok(());
        }

        let authoritative = evidence
            .iter()
            .max_by(|a, b| {
                a.source_worker
                    .authority_rank()
                    .cmp(&b.source_worker.authority_rank())
                    .then(a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
            })
            .expect("evidence is non-empty");

        let source_poi_id = authoritative
            .detail
            .get("source_poi_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("source_poi_id"))?
            .to_string();
        let target_poi_id = authoritative
            .detail
            .get("target_poi_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("target_poi_id"))?
            .to_string();
        let rel_type_str = authoritative
            .detail
            .get("rel_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing_field("rel_type"))?;
        let rel_type = tri_core::RelationshipType::parse(rel_type_str).ok_or_else(|| TriError::InvalidPayload {
            code: tri_core::ErrorCode::UnknownRelationshipType,
            message: format!("unknown relationship type {rel_type_str}"),
        })?;

        let weighted_total: f64 = evidence.iter().map(|e| e.confidence * self.config.weight_for(e.source_worker.config_key())).sum();
        let weight_total: f64 = evidence.iter().map(|e| self.config.weight_for(e.source_worker.config_key())).sum();
        let final_confidence = if weight_total > 0.0 { (weighted_total / weight_total).clamp(0.0, 1.0) } else { 0.0 };

        let status = if final_confidence >= self.config.confidence_threshold {
            ReconciliationStatus::Validated
        } else {
            ReconciliationStatus::Rejected
        };

        let validated = ValidatedRelationship {
            relationship_hash: hash.to_string(),
            run_id: run_id.to_string(),
            source_poi_id,
            target_poi_id,
            rel_type,
            final_confidence,
            evidence_count: evidence.len() as u32,
            status,
            updated_at: Utc::now(),
        };
        self.store.upsert_validated_relationship(&validated).map_err(TriError::from)?;
        self.store.delete_evidence_for_hash(run_id, hash).map_err(TriError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tri_core::{Evidence, OutboxRow, WorkerKind};

    fn store_evidence(store: &RelationalStore, job_id: &str, hash: &str, worker: WorkerKind, confidence: f64) {
        let detail = serde_json::json!({
            "source_poi_id": "fn:foo@a.js:1",
            "target_poi_id": "fn:bar@b.js:1",
            "rel_type": "CALLS",
        });
        let evidence = Evidence::new("run-1", job_id, hash, worker, confidence, detail, Utc::now());
        store.insert_evidence_with_outbox(&evidence, OutboxRow::ANALYSIS_FINDING, &serde_json::json!({})).unwrap();
    }

    #[test]
    fn high_confidence_consensus_is_validated() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store_evidence(&store, "job-1", "hash-a", WorkerKind::File, 0.9);
        store_evidence(&store, "job-2", "hash-a", WorkerKind::Directory, 0.95);
        store_evidence(&store, "job-3", "hash-a", WorkerKind::Global, 0.92);

        let worker = ReconciliationWorker::new(store.clone(), PipelineConfig::default());
        worker.reconcile("run-1", "hash-a").unwrap();

        let vr = store.validated_relationship("run-1", "hash-a").unwrap().unwrap();
        assert_eq!(vr.status, ReconciliationStatus::Validated);
        assert_eq!(vr.evidence_count, 3);
        assert!(store.evidence_for_hash("run-1", "hash-a").unwrap().is_empty(), "evidence must be cleaned up");
    }

    #[test]
    fn low_confidence_consensus_is_rejected() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store_evidence(&store, "job-1", "hash-b", WorkerKind::File, 0.2);
        store_evidence(&store, "job-2", "hash-b", WorkerKind::File, 0.3);

        let worker = ReconciliationWorker::new(store.clone(), PipelineConfig::default());
        worker.reconcile("run-1", "hash-b").unwrap();

        let vr = store.validated_relationship("run-1", "hash-b").unwrap().unwrap();
        assert_eq!(vr.status, ReconciliationStatus::Rejected);
    }

    #[test]
    fn redelivery_after_cleanup_is_a_no_op() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store_evidence(&store, "job-1", "hash-a", WorkerKind::File, 0.9);
        let worker = ReconciliationWorker::new(store.clone(), PipelineConfig::default());
        worker.reconcile("run-1", "hash-a").unwrap();
        worker.reconcile("run-1", "hash-a").unwrap();
        assert_eq!(store.validated_relationships_for_run("run-1").unwrap().len(), 1);
    }

    #[test]
    fn upsert_absorbs_double_execution_with_same_verdict() {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        store_evidence(&store, "job-1", "hash-a", WorkerKind::Global, 0.99);
        let worker = ReconciliationWorker::new(store.clone(), PipelineConfig::default());
        worker.reconcile("run-1", "hash-a").unwrap();
        let first = store.validated_relationship("run-1", "hash-a").unwrap().unwrap();

        store_evidence(&store, "job-1", "hash-a", WorkerKind::Global, 0.99);
        worker.reconcile("run-1", "hash-a").unwrap();
        let second = store.validated_relationship("run-1", "hash-a").unwrap().unwrap();
        assert_eq!(first.status, second.status);
    }
}
