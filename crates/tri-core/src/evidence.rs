//! Evidence, the transactional outbox row, and the reconciled
//! validated-relationship record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::WorkerKind;
use crate::relationship::RelationshipType;

/// One complete payload supporting a candidate relationship.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub run_id: String,
    pub relationship_hash: String,
    pub source_worker: WorkerKind,
    pub confidence: f64,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Builds evidence with a deterministic id derived from `job_id`
    /// and `relationship_hash`, so a redelivered job's second attempt
    /// computes the same id and duplicate inserts can be detected by
    /// primary-key collision rather than by a second read (§4.2's
    /// "key property — atomicity").
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        job_id: &str,
        relationship_hash: impl Into<String>,
        source_worker: WorkerKind,
        confidence: f64,
        detail: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let relationship_hash = relationship_hash.into();
        Self {
            id: deterministic_evidence_id(job_id, &relationship_hash),
            run_id: run_id.into(),
            relationship_hash,
            source_worker,
            confidence: confidence.clamp(0.0, 1.0),
            detail,
            created_at,
        }
    }
}

/// Deterministic evidence id: `sha256(jobId || "\0" || relationshipHash)`.
#[must_use]
pub fn deterministic_evidence_id(job_id: &str, relationship_hash: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(relationship_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Status of an [`OutboxRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

/// A queued side-effect of a database transaction.
///
/// Written only inside the same transaction that wrote the evidence
/// row it references (§3 "Outbox row" invariant; §9 "transactional
/// outbox" design note). `id` is monotonic and becomes the publish
/// idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_failures: u32,
}

impl OutboxRow {
    /// `event_type` for the event every analysis worker emits after
    /// writing evidence (§4.2 step 4).
    pub const ANALYSIS_FINDING: &'static str = "analysis-finding";

    #[must_use]
    pub fn new_pending(id: i64, event_type: impl Into<String>, payload: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            created_at,
            published_at: None,
            publish_failures: 0,
        }
    }
}

/// Per-hash verdict of whether enough evidence has arrived.
///
/// Seeded by the first proposer; may be raised, never lowered
/// ("first-seed-then-monotonically-raise", §9 open-question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub expected: u32,
    pub received: u32,
}

impl Expectation {
    #[must_use]
    pub fn seed(expected: u32) -> Self {
        Self {
            expected,
            received: 0,
        }
    }

    /// Raises `expected` if `candidate` is larger; never lowers it.
    pub fn raise(&mut self, candidate: u32) {
        if candidate > self.expected {
            self.expected = candidate;
        }
    }

    /// Records one more received evidence payload and reports whether
    /// `received` has just reached (not exceeded) `expected` —
    /// the caller's cue to enqueue exactly one reconcile job.
    pub fn record_received(&mut self) -> bool {
        self.received += 1;
        self.received == self.expected
    }
}

/// Verdict of a reconciled relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReconciliationStatus {
    Validated,
    Rejected,
}

/// The reconciled record, written exactly once per hash per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedRelationship {
    pub relationship_hash: String,
    pub run_id: String,
    pub source_poi_id: String,
    pub target_poi_id: String,
    pub rel_type: RelationshipType,
    pub final_confidence: f64,
    pub evidence_count: u32,
    pub status: ReconciliationStatus,
    pub updated_at: DateTime<Utc>,
}

/// Generates a fresh correlation id for log lines and idempotency keys
/// that do not derive from domain data (e.g. outbox publish attempts).
#[must_use]
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_evidence_id_is_stable() {
        let a = deterministic_evidence_id("job-1", "hash-a");
        let b = deterministic_evidence_id("job-1", "hash-a");
        assert_eq!(a, b);
    }

    #[test]
    fn expectation_never_lowers() {
        let mut e = Expectation::seed(3);
        e.raise(2);
        assert_eq!(e.expected, 3, "raise must not lower expected");
        e.raise(5);
        assert_eq!(e.expected, 5);
    }

    #[test]
    fn record_received_signals_exactly_at_threshold() {
        let mut e = Expectation::seed(2);
        assert!(!e.record_received());
        assert!(e.record_received(), "should signal once received hits expected");
        assert!(!e.record_received(), "must not re-signal once already past threshold");
        assert_eq!(e.received, 3);
    }
}
