// SPDX-License-Identifier: MIT OR Apache-2.0
//! The relational store: the transactional outbox, the evidence log,
//! and the validated-relationships table, backed by `SQLite`.
#![warn(missing_docs)]

mod migrations;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tri_core::{
    Evidence, JobType, OutboxRow, OutboxStatus, ReconciliationStatus, RelationshipType,
    TriError, ValidatedRelationship, WorkerKind,
};

/// Errors surfaced by the relational store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying `SQLite` driver returned an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A row's stored data could not be decoded back into a domain type.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row came from.
        table: String,
        /// What went wrong decoding it.
        reason: String,
    },
}

impl From<StoreError> for TriError {
    fn from(e: StoreError) -> Self {
        TriError::TransientExternal {
            code: tri_core::ErrorCode::StoreTimeout,
            message: e.to_string(),
            attempt: 1,
        }
    }
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_rfc3339(s: &str, table: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table: table.to_string(),
            reason: e.to_string(),
        })
}

/// A row of the `files` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub id: String,
    pub path: String,
    pub checksum: Option<String>,
    pub language: Option<String>,
    pub status: String,
}

/// A row of the `pois` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoiRow {
    pub id: String,
    pub file_id: String,
    pub file_path: String,
    pub name: String,
    pub kind: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

/// Status marker the self-cleaning reconciler's Mark phase writes.
pub const FILE_STATUS_ACTIVE: &str = "active";
/// Status marker the self-cleaning reconciler's Mark phase writes.
pub const FILE_STATUS_PENDING_DELETION: &str = "pending_deletion";

/// The relational store. One `Connection` per process, guarded by a
/// mutex since `SQLite` serializes writers anyway and the store is the
/// "only writer-contended resource on each host" (concurrency model).
pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Opens an in-memory database. Used by tests and by `tri-cli run`
    /// when no `--db` path is given.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ── files ────────────────────────────────────────────────────────

    /// Inserts a file row, ignoring the call if `path` is already present.
    pub fn insert_file(&self, id: &str, path: &str, checksum: Option<&str>, language: Option<&str>) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO files (id, path, checksum, language, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, path, checksum, language, FILE_STATUS_ACTIVE],
        )?;
        Ok(())
    }

    /// Lists every file row, for the Mark phase to compare against disk.
    pub fn list_files(&self) -> Result<Vec<FileRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, path, checksum, language, status FROM files")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FileRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    checksum: row.get(2)?,
                    language: row.get(3)?,
                    status: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Files currently marked `pending_deletion` (Sweep's worklist).
    pub fn files_pending_deletion(&self) -> Result<Vec<FileRow>, StoreError> {
        Ok(self
            .list_files()?
            .into_iter()
            .filter(|f| f.status == FILE_STATUS_PENDING_DELETION)
            .collect())
    }

    /// Sets a file row's status (the Mark phase's write).
    pub fn set_file_status(&self, id: &str, status: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE files SET status = ?1 WHERE id = ?2", params![status, id])?;
        Ok(())
    }

    /// Deletes a file row. Only called by Sweep, and only after the
    /// corresponding graph nodes have already been removed.
    pub fn delete_file(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM pois WHERE file_id = ?1", params![id])?;
        conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── pois ─────────────────────────────────────────────────────────

    /// Upserts a POI row.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_poi(
        &self,
        id: &str,
        file_id: &str,
        file_path: &str,
        name: &str,
        kind: &str,
        start_line: Option<u32>,
        end_line: Option<u32>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pois (id, file_id, file_path, name, kind, start_line, end_line, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?1)
             ON CONFLICT(id) DO UPDATE SET
                file_path = excluded.file_path, name = excluded.name, kind = excluded.kind,
                start_line = excluded.start_line, end_line = excluded.end_line",
            params![id, file_id, file_path, name, kind, start_line, end_line],
        )?;
        Ok(())
    }

    /// Reads one POI row by id, for the graph builder to recover a
    /// validated relationship endpoint's full properties (§4.6 "on
    /// create set all properties").
    pub fn get_poi(&self, id: &str) -> Result<Option<PoiRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, file_id, file_path, name, kind, start_line, end_line FROM pois WHERE id = ?1",
            params![id],
            |row| {
                Ok(PoiRow {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    file_path: row.get(2)?,
                    name: row.get(3)?,
                    kind: row.get(4)?,
                    start_line: row.get(5)?,
                    end_line: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ── evidence + outbox (the atomicity-critical write) ────────────

    /// Inserts one evidence row and its paired outbox row in a single
    /// transaction, and returns `true` if the evidence was newly
    /// written. Returns `false` without writing anything if a row with
    /// the same (deterministic) evidence id already exists — the
    /// duplicate-skip behavior a redelivered job relies on (§4.2's
    /// "key property — atomicity").
    pub fn insert_evidence_with_outbox(
        &self,
        evidence: &Evidence,
        outbox_event_type: &str,
        outbox_payload: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO relationship_evidence
                (id, run_id, relationship_hash, source_worker, evidence_payload, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                evidence.id,
                evidence.run_id,
                evidence.relationship_hash,
                evidence.source_worker.config_key(),
                serde_json::to_string(&evidence.detail).unwrap_or_default(),
                evidence.confidence,
                to_rfc3339(evidence.created_at),
            ],
        )?;
        if inserted == 0 {
            tx.rollback()?;
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO outbox (event_type, payload, status, created_at) VALUES (?1, ?2, 'PENDING', ?3)",
            params![
                outbox_event_type,
                serde_json::to_string(outbox_payload).unwrap_or_default(),
                to_rfc3339(Utc::now()),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Reads all evidence rows for one relationship hash in one run.
    pub fn evidence_for_hash(&self, run_id: &str, hash: &str) -> Result<Vec<Evidence>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, relationship_hash, source_worker, evidence_payload, confidence, created_at
             FROM relationship_evidence WHERE run_id = ?1 AND relationship_hash = ?2",
        )?;
        let rows = stmt
            .query_map(params![run_id, hash], |row| {
                let worker: String = row.get(3)?;
                let payload: String = row.get(4)?;
                let created_at: String = row.get(6)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, worker, payload, row.get::<_, f64>(5)?, created_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, run_id, relationship_hash, worker, payload, confidence, created_at)| {
                let source_worker = parse_worker_kind(&worker).ok_or_else(|| StoreError::Corrupt {
                    table: "relationship_evidence".into(),
                    reason: format!("unknown source_worker {worker}"),
                })?;
                let detail = serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);
                Ok(Evidence {
                    id,
                    run_id,
                    relationship_hash,
                    source_worker,
                    confidence,
                    detail,
                    created_at: from_rfc3339(&created_at, "relationship_evidence")?,
                })
            })
            .collect()
    }

    /// Deletes all evidence rows for a hash (reconciliation's cleanup step).
    pub fn delete_evidence_for_hash(&self, run_id: &str, hash: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "DELETE FROM relationship_evidence WHERE run_id = ?1 AND relationship_hash = ?2",
            params![run_id, hash],
        )?)
    }

    // ── outbox ───────────────────────────────────────────────────────

    /// Selects up to `limit` PENDING rows in id order (the publisher's poll).
    pub fn outbox_pending(&self, limit: u32) -> Result<Vec<OutboxRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_type, payload, status, failures, created_at, published_at
             FROM outbox WHERE status = 'PENDING' ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], row_to_outbox)?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    }

    /// Marks an outbox row `PUBLISHED`.
    pub fn mark_outbox_published(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE outbox SET status = 'PUBLISHED', published_at = ?2 WHERE id = ?1",
            params![id, to_rfc3339(Utc::now())],
        )?;
        Ok(())
    }

    /// Records a failed publish attempt. Marks `FAILED` once `failures`
    /// reaches `max_failures`; otherwise leaves the row `PENDING` for
    /// the next tick.
    pub fn record_outbox_publish_failure(&self, id: i64, max_failures: u32) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE outbox SET failures = failures + 1 WHERE id = ?1", params![id])?;
        let failures: u32 = conn.query_row("SELECT failures FROM outbox WHERE id = ?1", params![id], |r| r.get(0))?;
        if failures >= max_failures {
            conn.execute("UPDATE outbox SET status = 'FAILED' WHERE id = ?1", params![id])?;
        }
        Ok(())
    }

    // ── relationships ────────────────────────────────────────────────

    /// Upserts the reconciled record by `(run_id, relationship_hash)`.
    /// Idempotent under redelivery (§4.5 step 5).
    pub fn upsert_validated_relationship(&self, vr: &ValidatedRelationship) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO relationships
                (relationship_hash, run_id, source_poi_id, target_poi_id, type, final_confidence, evidence_count, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(run_id, relationship_hash) DO UPDATE SET
                source_poi_id = excluded.source_poi_id,
                target_poi_id = excluded.target_poi_id,
                type = excluded.type,
                final_confidence = excluded.final_confidence,
                evidence_count = excluded.evidence_count,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                vr.relationship_hash,
                vr.run_id,
                vr.source_poi_id,
                vr.target_poi_id,
                vr.rel_type.as_str(),
                vr.final_confidence,
                vr.evidence_count,
                reconciliation_status_str(vr.status),
                to_rfc3339(vr.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Fetches one validated relationship row, if present.
    pub fn validated_relationship(&self, run_id: &str, hash: &str) -> Result<Option<ValidatedRelationship>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT relationship_hash, run_id, source_poi_id, target_poi_id, type, final_confidence, evidence_count, status, updated_at
             FROM relationships WHERE run_id = ?1 AND relationship_hash = ?2",
            params![run_id, hash],
            row_to_validated_relationship,
        )
        .optional()
        .map_err(StoreError::from)?
        .transpose()
    }

    /// All validated relationships for a run, ordered by hash (the
    /// graph builder's "stream in id order" contract — rowid order is
    /// approximated here by relationship_hash order since the table
    /// has no surrogate integer key; stable within one process run).
    pub fn validated_relationships_for_run(&self, run_id: &str) -> Result<Vec<ValidatedRelationship>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT relationship_hash, run_id, source_poi_id, target_poi_id, type, final_confidence, evidence_count, status, updated_at
             FROM relationships WHERE run_id = ?1 ORDER BY relationship_hash",
        )?;
        let rows = stmt
            .query_map(params![run_id], row_to_validated_relationship)?
            .collect::<Result<Vec<_>, rusqlite::Error>>()?;
        rows.into_iter().collect()
    }
}

fn parse_worker_kind(s: &str) -> Option<WorkerKind> {
    match s {
        "file" => Some(WorkerKind::File),
        "directory" => Some(WorkerKind::Directory),
        "global" => Some(WorkerKind::Global),
        "validation" => Some(WorkerKind::Validation),
        "reconcile" => Some(WorkerKind::Reconcile),
        "graph_build" => Some(WorkerKind::GraphBuild),
        _ => None,
    }
}

fn reconciliation_status_str(status: ReconciliationStatus) -> &'static str {
    match status {
        ReconciliationStatus::Validated => "VALIDATED",
        ReconciliationStatus::Rejected => "REJECTED",
    }
}

fn row_to_outbox(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRow> {
    let status: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let published_at: Option<String> = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap());
    Ok(OutboxRow {
        id: row.get(0)?,
        event_type: row.get(1)?,
        payload: serde_json::from_str(&row.get::<_, String>(2)?).unwrap_or(serde_json::Value::Null),
        status: match status.as_str() {
            "PUBLISHED" => OutboxStatus::Published,
            "FAILED" => OutboxStatus::Failed,
            _ => OutboxStatus::Pending,
        },
        created_at,
        published_at: published_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        publish_failures: row.get(4)?,
    })
}

fn row_to_validated_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ValidatedRelationship, StoreError>> {
    let rel_type: String = row.get(4)?;
    let status: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let parsed = (|| -> Result<ValidatedRelationship, StoreError> {
        Ok(ValidatedRelationship {
            relationship_hash: row.get(0)?,
            run_id: row.get(1)?,
            source_poi_id: row.get(2)?,
            target_poi_id: row.get(3)?,
            rel_type: RelationshipType::parse(&rel_type).ok_or_else(|| StoreError::Corrupt {
                table: "relationships".into(),
                reason: format!("unknown type {rel_type}"),
            })?,
            final_confidence: row.get(5)?,
            evidence_count: row.get(6)?,
            status: if status == "VALIDATED" { ReconciliationStatus::Validated } else { ReconciliationStatus::Rejected },
            updated_at: from_rfc3339(&updated_at, "relationships")?,
        })
    })();
    Ok(parsed)
}

/// `JobType` queue-name lookups are re-exported here purely so
/// downstream crates can map an outbox event's payload back to the
/// job type it should enqueue without importing `tri-core` twice.
pub fn queue_name_for(job_type: JobType) -> &'static str {
    job_type.queue_name()
}
