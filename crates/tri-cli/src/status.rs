//! `tri status <run-id>`: prints what's durably knowable about a run
//! from the relational store alone.
//!
//! The in-process `tri-queue`/`tri-cache` backends this CLI wires up
//! for `tri run` do not outlive the process, so a separate `tri status`
//! invocation can only report what `tri-store` persisted — evidence and
//! validated relationships, not live job/dead-letter counts. A
//! deployment backing those two traits with durable implementations
//! would extend this report with their state too.

use anyhow::{Context, Result};
use tri_core::ReconciliationStatus;
use tri_store::RelationalStore;

/// Everything this binary can report about a run after the fact.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub run_id: String,
    pub validated_count: usize,
    pub rejected_count: usize,
    pub tracked_file_count: usize,
    pub outbox_pending_count: usize,
}

/// Builds a [`StatusReport`] for `run_id` by reading `db_path`.
pub fn report(db_path: &std::path::Path, run_id: &str) -> Result<StatusReport> {
    let store = RelationalStore::open(db_path).with_context(|| format!("opening store at {}", db_path.display()))?;
    let relationships = store.validated_relationships_for_run(run_id).context("reading validated relationships")?;
    let validated_count = relationships.iter().filter(|r| r.status == ReconciliationStatus::Validated).count();
    let rejected_count = relationships.iter().filter(|r| r.status == ReconciliationStatus::Rejected).count();
    let tracked_file_count = store.list_files().context("reading files")?.len();
    let outbox_pending_count = store.outbox_pending(u32::MAX).context("reading outbox")?.len();

    Ok(StatusReport {
        run_id: run_id.to_string(),
        validated_count,
        rejected_count,
        tracked_file_count,
        outbox_pending_count,
    })
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "run_id:            {}", self.run_id)?;
        writeln!(f, "validated:         {}", self.validated_count)?;
        writeln!(f, "rejected:          {}", self.rejected_count)?;
        writeln!(f, "tracked files:     {}", self.tracked_file_count)?;
        write!(f, "outbox pending:    {}", self.outbox_pending_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tri_core::{RelationshipType, ValidatedRelationship};

    #[test]
    fn reports_counts_from_a_persisted_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tri.sqlite3");
        {
            let store = RelationalStore::open(&db_path).unwrap();
            store.insert_file("file-1", "a.js", None, None).unwrap();
            store
                .upsert_validated_relationship(&ValidatedRelationship {
                    relationship_hash: "hash-a".to_string(),
                    run_id: "run-1".to_string(),
                    source_poi_id: "fn:foo@a.js:1".to_string(),
                    target_poi_id: "fn:bar@a.js:1".to_string(),
                    rel_type: RelationshipType::Calls,
                    final_confidence: 0.9,
                    evidence_count: 2,
                    status: ReconciliationStatus::Validated,
                    updated_at: Utc::now(),
                })
                .unwrap();
        }

        let report = report(&db_path, "run-1").unwrap();
        assert_eq!(report.validated_count, 1);
        assert_eq!(report.rejected_count, 0);
        assert_eq!(report.tracked_file_count, 1);
    }
}
