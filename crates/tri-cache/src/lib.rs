// SPDX-License-Identifier: MIT OR Apache-2.0
//! The manifest/cache protocol: key layout and atomic scripts.
//!
//! [`Cache`] is the trait every worker programs against; [`MemoryCache`]
//! is the in-process implementation used by default and by tests. A
//! production deployment backs [`Cache`] with Redis (or similar) and
//! implements each method as a Lua script — the trait's method
//! boundaries are drawn exactly at those script boundaries so the two
//! implementations stay behaviorally identical.
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tri_core::TriError;

/// Which of Scout's three job-id sets a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobSetKind {
    Files,
    Dirs,
    Global,
}

impl JobSetKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Dirs => "dirs",
            Self::Global => "global",
        }
    }
}

/// Errors surfaced by a [`Cache`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backend did not respond in time.
    #[error("cache command timed out")]
    Timeout,
    /// A manifest key that Scout should have seeded is missing.
    #[error("missing manifest key: {key}")]
    MissingKey {
        /// The key that was expected.
        key: String,
    },
}

impl From<CacheError> for TriError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Timeout => TriError::TransientExternal {
                code: tri_core::ErrorCode::CacheTimeout,
                message: e.to_string(),
                attempt: 1,
            },
            CacheError::MissingKey { .. } => TriError::Fatal {
                code: tri_core::ErrorCode::MissingManifestKey,
                message: e.to_string(),
            },
        }
    }
}

/// The manifest/cache protocol, scoped by `runId`.
///
/// Every method here corresponds to exactly one atomic script in the
/// external-interfaces contract; no method here performs a
/// read-then-write across two calls, so every implementation — in
/// process or over the network — must make each one atomic.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Writes `run:<runId>:config` (overwrites any existing value;
    /// Scout calls this exactly once per run).
    async fn set_config(&self, run_id: &str, config_json: &str) -> Result<(), CacheError>;

    /// Reads `run:<runId>:config`.
    async fn get_config(&self, run_id: &str) -> Result<Option<String>, CacheError>;

    /// `SADD run:<runId>:jobs:<kind> <jobId>`. Returns `true` if the id
    /// was newly added.
    async fn add_job_id(&self, run_id: &str, kind: JobSetKind, job_id: &str) -> Result<bool, CacheError>;

    /// Reads the full `run:<runId>:jobs:<kind>` set.
    async fn job_ids(&self, run_id: &str, kind: JobSetKind) -> Result<HashSet<String>, CacheError>;

    /// `HSET run:<runId>:file_to_job_map <filePath> <jobId>`.
    async fn map_file_to_job(&self, run_id: &str, file_path: &str, job_id: &str) -> Result<(), CacheError>;

    /// `HGET run:<runId>:file_to_job_map <filePath>`.
    async fn job_for_file(&self, run_id: &str, file_path: &str) -> Result<Option<String>, CacheError>;

    /// `HSETNX run:<runId>:rel_map <hash> <expected>`. Returns `true`
    /// if this call seeded the expectation (first proposer wins).
    async fn seed_expectation(&self, run_id: &str, hash: &str, expected: u32) -> Result<bool, CacheError>;

    /// The scripted compare-and-raise: sets `run:<runId>:rel_map[hash]`
    /// to `candidate` only if `candidate` is larger than the current
    /// value. Returns the resulting (possibly unchanged) expectation.
    /// Errors with [`CacheError::MissingKey`] if no expectation was
    /// ever seeded for `hash` (a contract violation: `seed_expectation`
    /// must run first).
    async fn raise_expectation(&self, run_id: &str, hash: &str, candidate: u32) -> Result<u32, CacheError>;

    /// Reads the current expectation for `hash` without mutating it.
    async fn expectation(&self, run_id: &str, hash: &str) -> Result<Option<u32>, CacheError>;

    /// The validation counter script: increments
    /// `evidence_count:<runId>:<hash>` and returns `(received, expected)`
    /// read from `rel_map` in the same atomic step.
    async fn incr_and_read(&self, run_id: &str, hash: &str) -> Result<(u32, u32), CacheError>;

    /// `SADD run:<runId>:reconciled <hash>`. Returns `true` if `hash`
    /// was newly added — the single-enqueue guarantee for reconcile jobs.
    async fn mark_reconciled(&self, run_id: &str, hash: &str) -> Result<bool, CacheError>;

    /// `SET run:<runId>:status <status>`.
    async fn set_status(&self, run_id: &str, status: &str) -> Result<(), CacheError>;

    /// `GET run:<runId>:status`.
    async fn get_status(&self, run_id: &str) -> Result<Option<String>, CacheError>;
}

#[derive(Default)]
struct RunManifest {
    config: Option<String>,
    jobs_files: HashSet<String>,
    jobs_dirs: HashSet<String>,
    jobs_global: HashSet<String>,
    file_to_job: HashMap<String, String>,
    rel_map: HashMap<String, u32>,
    evidence_count: HashMap<String, u32>,
    reconciled: HashSet<String>,
    status: Option<String>,
}

impl RunManifest {
    fn set_for(&mut self, kind: JobSetKind) -> &mut HashSet<String> {
        match kind {
            JobSetKind::Files => &mut self.jobs_files,
            JobSetKind::Dirs => &mut self.jobs_dirs,
            JobSetKind::Global => &mut self.jobs_global,
        }
    }
}

/// In-process [`Cache`] implementation: one [`Mutex`]-guarded
/// [`RunManifest`] per `runId`. Every method takes the mutex for its
/// entire body, which is exactly what makes it atomic — the in-process
/// analogue of a Redis Lua script.
#[derive(Default)]
pub struct MemoryCache {
    runs: Mutex<HashMap<String, RunManifest>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_config(&self, run_id: &str, config_json: &str) -> Result<(), CacheError> {
        let mut runs = self.runs.lock().unwrap();
        runs.entry(run_id.to_string()).or_default().config = Some(config_json.to_string());
        Ok(())
    }

    async fn get_config(&self, run_id: &str) -> Result<Option<String>, CacheError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(run_id).and_then(|m| m.config.clone()))
    }

    async fn add_job_id(&self, run_id: &str, kind: JobSetKind, job_id: &str) -> Result<bool, CacheError> {
        let mut runs = self.runs.lock().unwrap();
        let manifest = runs.entry(run_id.to_string()).or_default();
        Ok(manifest.set_for(kind).insert(job_id.to_string()))
    }

    async fn job_ids(&self, run_id: &str, kind: JobSetKind) -> Result<HashSet<String>, CacheError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .get(run_id)
            .map(|m| match kind {
                JobSetKind::Files => m.jobs_files.clone(),
                JobSetKind::Dirs => m.jobs_dirs.clone(),
                JobSetKind::Global => m.jobs_global.clone(),
            })
            .unwrap_or_default())
    }

    async fn map_file_to_job(&self, run_id: &str, file_path: &str, job_id: &str) -> Result<(), CacheError> {
        let mut runs = self.runs.lock().unwrap();
        runs.entry(run_id.to_string())
            .or_default()
            .file_to_job
            .insert(file_path.to_string(), job_id.to_string());
        Ok(())
    }

    async fn job_for_file(&self, run_id: &str, file_path: &str) -> Result<Option<String>, CacheError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(run_id).and_then(|m| m.file_to_job.get(file_path).cloned()))
    }

    async fn seed_expectation(&self, run_id: &str, hash: &str, expected: u32) -> Result<bool, CacheError> {
        let mut runs = self.runs.lock().unwrap();
        let manifest = runs.entry(run_id.to_string()).or_default();
        if manifest.rel_map.contains_key(hash) {
            return Ok(false);
        }
        manifest.rel_map.insert(hash.to_string(), expected);
        Ok(true)
    }

    async fn raise_expectation(&self, run_id: &str, hash: &str, candidate: u32) -> Result<u32, CacheError> {
        let mut runs = self.runs.lock().unwrap();
        let manifest = runs.entry(run_id.to_string()).or_default();
        let current = manifest.rel_map.get(hash).copied().ok_or_else(|| CacheError::MissingKey {
            key: format!("run:{run_id}:rel_map[{hash}]"),
        })?;
        if candidate > current {
            manifest.rel_map.insert(hash.to_string(), candidate);
            Ok(candidate)
        } else {
            Ok(current)
        }
    }

    async fn expectation(&self, run_id: &str, hash: &str) -> Result<Option<u32>, CacheError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(run_id).and_then(|m| m.rel_map.get(hash).copied()))
    }

    async fn incr_and_read(&self, run_id: &str, hash: &str) -> Result<(u32, u32), CacheError> {
        let mut runs = self.runs.lock().unwrap();
        let manifest = runs.entry(run_id.to_string()).or_default();
        let expected = manifest.rel_map.get(hash).copied().ok_or_else(|| CacheError::MissingKey {
            key: format!("run:{run_id}:rel_map[{hash}]"),
        })?;
        let counter = manifest.evidence_count.entry(hash.to_string()).or_insert(0);
        *counter += 1;
        Ok((*counter, expected))
    }

    async fn mark_reconciled(&self, run_id: &str, hash: &str) -> Result<bool, CacheError> {
        let mut runs = self.runs.lock().unwrap();
        Ok(runs.entry(run_id.to_string()).or_default().reconciled.insert(hash.to_string()))
    }

    async fn set_status(&self, run_id: &str, status: &str) -> Result<(), CacheError> {
        let mut runs = self.runs.lock().unwrap();
        runs.entry(run_id.to_string()).or_default().status = Some(status.to_string());
        Ok(())
    }

    async fn get_status(&self, run_id: &str) -> Result<Option<String>, CacheError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(run_id).and_then(|m| m.status.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_expectation_only_wins_once() {
        let cache = MemoryCache::new();
        assert!(cache.seed_expectation("run-1", "hash-a", 2).await.unwrap());
        assert!(!cache.seed_expectation("run-1", "hash-a", 3).await.unwrap());
        assert_eq!(cache.expectation("run-1", "hash-a").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn raise_expectation_never_lowers() {
        let cache = MemoryCache::new();
        cache.seed_expectation("run-1", "hash-a", 2).await.unwrap();
        assert_eq!(cache.raise_expectation("run-1", "hash-a", 1).await.unwrap(), 2);
        assert_eq!(cache.raise_expectation("run-1", "hash-a", 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn raise_expectation_without_seed_is_missing_key() {
        let cache = MemoryCache::new();
        let err = cache.raise_expectation("run-1", "hash-a", 3).await.unwrap_err();
        assert!(matches!(err, CacheError::MissingKey { .. }));
    }

    #[tokio::test]
    async fn incr_and_read_tracks_received_against_expected() {
        let cache = MemoryCache::new();
        cache.seed_expectation("run-1", "hash-a", 2).await.unwrap();
        assert_eq!(cache.incr_and_read("run-1", "hash-a").await.unwrap(), (1, 2));
        assert_eq!(cache.incr_and_read("run-1", "hash-a").await.unwrap(), (2, 2));
        assert_eq!(cache.incr_and_read("run-1", "hash-a").await.unwrap(), (3, 2));
    }

    #[tokio::test]
    async fn mark_reconciled_is_single_enqueue_guard() {
        let cache = MemoryCache::new();
        assert!(cache.mark_reconciled("run-1", "hash-a").await.unwrap());
        assert!(!cache.mark_reconciled("run-1", "hash-a").await.unwrap());
    }

    #[tokio::test]
    async fn job_sets_are_independent_per_kind() {
        let cache = MemoryCache::new();
        cache.add_job_id("run-1", JobSetKind::Files, "job-1").await.unwrap();
        cache.add_job_id("run-1", JobSetKind::Dirs, "job-2").await.unwrap();
        assert_eq!(cache.job_ids("run-1", JobSetKind::Files).await.unwrap().len(), 1);
        assert_eq!(cache.job_ids("run-1", JobSetKind::Dirs).await.unwrap().len(), 1);
        assert_eq!(cache.job_ids("run-1", JobSetKind::Global).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn runs_are_isolated_by_run_id() {
        let cache = MemoryCache::new();
        cache.set_status("run-1", "running").await.unwrap();
        assert_eq!(cache.get_status("run-2").await.unwrap(), None);
    }
}
