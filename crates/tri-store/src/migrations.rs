//! Schema for the relational store.

/// Creates all tables and indexes if they do not already exist.
/// Idempotent: safe to call on every process start.
pub fn apply(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS files (
            id       TEXT PRIMARY KEY,
            path     TEXT NOT NULL UNIQUE,
            checksum TEXT,
            language TEXT,
            status   TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS pois (
            id         TEXT PRIMARY KEY,
            file_id    TEXT NOT NULL REFERENCES files(id),
            file_path  TEXT NOT NULL,
            name       TEXT NOT NULL,
            kind       TEXT NOT NULL,
            start_line INTEGER,
            end_line   INTEGER,
            hash       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_pois_file_id ON pois(file_id);

        CREATE TABLE IF NOT EXISTS outbox (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type   TEXT NOT NULL,
            payload      TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'PENDING',
            failures     INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            published_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_status_id ON outbox(status, id);

        CREATE TABLE IF NOT EXISTS relationship_evidence (
            id                TEXT PRIMARY KEY,
            run_id            TEXT NOT NULL,
            relationship_hash TEXT NOT NULL,
            source_worker     TEXT NOT NULL,
            evidence_payload  TEXT NOT NULL,
            confidence        REAL NOT NULL,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_evidence_run_hash
            ON relationship_evidence(run_id, relationship_hash);

        CREATE TABLE IF NOT EXISTS relationships (
            relationship_hash TEXT NOT NULL,
            run_id            TEXT NOT NULL,
            source_poi_id     TEXT NOT NULL,
            target_poi_id     TEXT NOT NULL,
            type              TEXT NOT NULL,
            final_confidence  REAL NOT NULL,
            evidence_count    INTEGER NOT NULL,
            status            TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            PRIMARY KEY (run_id, relationship_hash)
        );
        ",
    )
}
