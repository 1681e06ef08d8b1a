//! Scout: walks a run's root, seeds the manifest, and enqueues every
//! analysis job paused before releasing them in one `resume_run` call
//! (§4.1).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tri_cache::{Cache, JobSetKind};
use tri_core::{Job, JobType, Poi, PoiKind};
use tri_queue::{JobQueue, graph_build_finalizer};
use tri_store::RelationalStore;

use crate::globs::ExcludeGlobs;
use crate::lease::{LeaseError, LeaseHandle, LeaseManager};
use crate::walker::{self, WalkResult};

/// Errors raised while starting a run.
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    /// Another Scout process already holds the lease for this root.
    #[error("root is already being scanned by another process: {0}")]
    LeaseHeld(String),
    /// The filesystem walk failed (unreadable root).
    #[error("walk failed: {0}")]
    WalkFailed(#[source] anyhow::Error),
    /// The cache backend rejected a manifest write.
    #[error("manifest write failed: {0}")]
    Cache(#[from] tri_cache::CacheError),
    /// The queue backend rejected an enqueue.
    #[error("enqueue failed: {0}")]
    Queue(#[from] tri_queue::QueueError),
    /// The relational store rejected a file row write.
    #[error("store write failed: {0}")]
    Store(#[from] tri_store::StoreError),
}

impl From<LeaseError> for ScoutError {
    fn from(e: LeaseError) -> Self {
        ScoutError::LeaseHeld(e.to_string())
    }
}

/// Outcome of a successful `start` call.
#[derive(Debug, Clone)]
pub struct StartedRun {
    pub run_id: String,
    pub file_job_count: usize,
    pub dir_job_count: usize,
    pub graph_build_job_id: String,
}

/// Drives §4.1's start-of-run algorithm: acquire the lease, walk the
/// tree, seed the manifest, enqueue every job paused, then resume the
/// run in one shot so no worker observes a half-populated manifest.
pub struct Scout {
    leases: Arc<LeaseManager>,
    lease_ttl: Duration,
    lease_renewal: Duration,
}

impl Scout {
    /// Builds a Scout sharing `leases` with any sibling process in this
    /// runtime (tests typically construct one `LeaseManager` per
    /// simulated host).
    #[must_use]
    pub fn new(leases: Arc<LeaseManager>, lease_ttl: Duration, lease_renewal: Duration) -> Self {
        Self { leases, lease_ttl, lease_renewal }
    }

    /// Runs the full start-of-run sequence for `root_path` under `run_id`.
    pub async fn start(
        &self,
        run_id: &str,
        root_path: &Path,
        config_json: &str,
        excludes: &ExcludeGlobs,
        cache: &dyn Cache,
        queue: &dyn JobQueue,
        store: &RelationalStore,
    ) -> Result<StartedRun, ScoutError> {
        let handle = self.leases.acquire(&root_path.display().to_string(), self.lease_ttl)?;
        let result = self.start_with_lease(run_id, root_path, config_json, excludes, cache, queue, store, &handle).await;
        // Best-effort release; a lost lease (already reassigned) is not
        // escalated here since the run's own outcome is what matters.
        let _ = self.leases.release(&handle);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_with_lease(
        &self,
        run_id: &str,
        root_path: &Path,
        config_json: &str,
        excludes: &ExcludeGlobs,
        cache: &dyn Cache,
        queue: &dyn JobQueue,
        store: &RelationalStore,
        _handle: &LeaseHandle,
    ) -> Result<StartedRun, ScoutError> {
        let WalkResult { files, dirs } = walker::walk(root_path, excludes).map_err(ScoutError::WalkFailed)?;

        cache.set_config(run_id, config_json).await?;

        let mut analysis_job_ids = Vec::with_capacity(files.len() + dirs.len() + 1);

        for file in &files {
            // Populate the `files` table up front so it reflects every
            // tracked file regardless of whether analysis later finds
            // any relationship touching it (§4.7's Mark phase and `tri
            // status`'s tracked-file count both read this table).
            let file_id = Poi::compute_id(PoiKind::File, &file.relative_path, &file.relative_path, None);
            store.insert_file(&file_id, &file.relative_path, None, None)?;

            let job = Job::new(
                run_id,
                JobType::FileAnalysis,
                serde_json::json!({ "run_id": run_id, "file_path": file.relative_path }),
            );
            cache.add_job_id(run_id, JobSetKind::Files, &job.id).await?;
            cache.map_file_to_job(run_id, &file.relative_path, &job.id).await?;
            analysis_job_ids.push(job.id.clone());
            queue.enqueue(job).await?;
        }

        for dir in &dirs {
            let job = Job::new(
                run_id,
                JobType::DirectoryAnalysis,
                serde_json::json!({ "run_id": run_id, "dir_path": dir.relative_path }),
            );
            cache.add_job_id(run_id, JobSetKind::Dirs, &job.id).await?;
            analysis_job_ids.push(job.id.clone());
            queue.enqueue(job).await?;
        }

        let global_job = Job::new(run_id, JobType::GlobalAnalysis, serde_json::json!({ "run_id": run_id }));
        cache.add_job_id(run_id, JobSetKind::Global, &global_job.id).await?;
        analysis_job_ids.push(global_job.id.clone());
        queue.enqueue(global_job).await?;

        let finalizer = graph_build_finalizer(run_id, &analysis_job_ids);
        let finalizer_id = finalizer.id.clone();
        queue.enqueue(finalizer).await?;

        queue.resume_run(run_id).await?;

        Ok(StartedRun {
            run_id: run_id.to_string(),
            file_job_count: files.len(),
            dir_job_count: dirs.len(),
            graph_build_job_id: finalizer_id,
        })
    }

    /// Renews the root's lease once; callers drive this on a timer at
    /// `lease_renewal` cadence and treat a lost lease as a shutdown signal.
    pub fn renew(&self, handle: &LeaseHandle) -> Result<(), LeaseError> {
        self.leases.renew(handle, self.lease_ttl)
    }

    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        self.lease_renewal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tri_cache::MemoryCache;
    use tri_core::JobStatus;
    use tri_queue::{MemoryJobQueue, RetryPolicy};
    use tri_store::RelationalStore;

    async fn seeded_scout() -> (Scout, MemoryCache, MemoryJobQueue, RelationalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "").unwrap();

        let scout = Scout::new(Arc::new(LeaseManager::new()), Duration::from_secs(30), Duration::from_secs(10));
        let cache = MemoryCache::new();
        let queue = MemoryJobQueue::new(RetryPolicy::default());
        let store = RelationalStore::open_in_memory().unwrap();
        (scout, cache, queue, store, dir)
    }

    #[tokio::test]
    async fn start_seeds_manifest_and_enqueues_every_job_paused_then_resumed() {
        let (scout, cache, queue, store, dir) = seeded_scout().await;
        let excludes = ExcludeGlobs::new(&[]).unwrap();

        let started = scout
            .start("run-1", dir.path(), "{}", &excludes, &cache, &queue, &store)
            .await
            .unwrap();

        assert_eq!(started.file_job_count, 2);
        assert_eq!(started.dir_job_count, 1);
        assert_eq!(cache.get_config("run-1").await.unwrap(), Some("{}".to_string()));
        assert_eq!(cache.job_ids("run-1", JobSetKind::Files).await.unwrap().len(), 2);
        assert_eq!(cache.job_ids("run-1", JobSetKind::Global).await.unwrap().len(), 1);

        // Everything is resumed: dequeuing each analysis queue should
        // yield jobs immediately, no manual resume needed by the caller.
        assert!(queue.dequeue("file-analysis").await.unwrap().is_some());
        assert!(queue.dequeue("global-analysis").await.unwrap().is_some());

        let finalizer = queue.job(&started.graph_build_job_id).await.unwrap().unwrap();
        assert_eq!(finalizer.status, JobStatus::WaitingChildren);

        assert_eq!(store.list_files().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_start_on_same_root_is_rejected_by_the_lease() {
        let (scout, cache, queue, store, dir) = seeded_scout().await;
        let excludes = ExcludeGlobs::new(&[]).unwrap();
        let handle = scout.leases.acquire(&dir.path().display().to_string(), Duration::from_secs(30)).unwrap();

        let result = scout.start("run-2", dir.path(), "{}", &excludes, &cache, &queue, &store).await;
        assert!(matches!(result, Err(ScoutError::LeaseHeld(_))));

        scout.leases.release(&handle).unwrap();
    }

    #[tokio::test]
    async fn file_to_job_mapping_resolves_every_walked_file() {
        let (scout, cache, queue, store, dir) = seeded_scout().await;
        let excludes = ExcludeGlobs::new(&[]).unwrap();
        scout.start("run-1", dir.path(), "{}", &excludes, &cache, &queue, &store).await.unwrap();

        assert!(cache.job_for_file("run-1", "src/lib.rs").await.unwrap().is_some());
        assert!(cache.job_for_file("run-1", "src/main.rs").await.unwrap().is_some());
    }
}
