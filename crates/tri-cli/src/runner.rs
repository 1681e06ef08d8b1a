//! `tri run`: drives Scout then drains every queue in-process until the
//! run settles (§4.10 "runs Scout then drains all queues synchronously
//! in-process").

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tri_cache::{Cache, MemoryCache};
use tri_config::PipelineConfig;
use tri_core::{Job, JobType, Run, RunStatus, TriError, WorkerKind, new_correlation_id};
use tri_graph::{GraphStore, InMemoryGraph};
use tri_llm::{LlmClient, ScriptedLlm};
use tri_outbox::{FindingSink, OutboxPublisher, PublishError};
use tri_queue::{JobQueue, MemoryJobQueue, RetryPolicy};
use tri_scout::{ExcludeGlobs, LeaseManager, Scout};
use tri_store::RelationalStore;
use tri_workers::{AnalysisWorker, GraphBuilder, ReconciliationWorker, RunController, SelfCleaner, ValidationWorker};

/// Result of one end-to-end `tri run` invocation.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub file_job_count: usize,
    pub dir_job_count: usize,
    pub dead_letter_count: usize,
    pub files_marked_deleted: usize,
    pub files_swept: usize,
}

/// Hands outbox `analysis-finding` events straight to the validation
/// worker, in-process. A production deployment would instead publish
/// to whatever broker `tri-queue`'s durable backend consumes from.
struct ValidationSink(Arc<ValidationWorker>);

#[async_trait]
impl FindingSink for ValidationSink {
    async fn publish(&self, _event_type: &str, payload: &serde_json::Value) -> Result<(), PublishError> {
        self.0.process_event(payload).await.map_err(|e| PublishError(e.to_string()))
    }
}

/// Runs the pipeline over `root` to completion.
///
/// `db_path` selects a durable SQLite file for the relational store; `None`
/// keeps it in memory (fine for a one-shot CLI invocation, but `tri status`
/// afterward has nothing to read). `worker_pool_size` is the number of jobs
/// drained per queue per tick, approximating "N independent processes" (§5).
pub async fn run_pipeline(root: &Path, config: &PipelineConfig, db_path: Option<&Path>, worker_pool_size: usize) -> Result<RunSummary> {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(RetryPolicy::new(config.max_job_retries, Duration::from_millis(config.job_backoff_base_ms))));
    let store = Arc::new(match db_path {
        Some(p) => RelationalStore::open(p).with_context(|| format!("opening store at {}", p.display()))?,
        None => RelationalStore::open_in_memory().context("opening in-memory store")?,
    });
    let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraph::new());
    // No live provider is wired into this workspace (tri-llm ships only
    // the client-side contract); a scripted client that finds nothing
    // keeps the binary runnable end to end without one.
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::always(serde_json::json!({"relationships": []}).to_string()));

    let leases = Arc::new(LeaseManager::new());
    let scout = Scout::new(leases, Duration::from_millis(config.lock_lease_ms), Duration::from_millis(config.lock_renewal_ms));
    let excludes = ExcludeGlobs::new(&config.exclude_globs).context("compiling exclude globs")?;

    let run_id = new_correlation_id();
    let config_json = serde_json::to_string(config).context("serializing config for manifest")?;
    let started = scout
        .start(&run_id, root, &config_json, &excludes, cache.as_ref(), queue.as_ref(), store.as_ref())
        .await
        .context("scout failed to start run")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let validation = Arc::new(ValidationWorker::new(cache.clone(), queue.clone()));
    let outbox = Arc::new(OutboxPublisher::new(
        store.clone(),
        Arc::new(ValidationSink(validation)),
        config.ingest_batch_size,
        5,
        Duration::from_millis(config.outbox_poll_interval_ms),
    ));
    let outbox_handle = tokio::spawn({
        let outbox = outbox.clone();
        async move { outbox.run(shutdown_rx).await }
    });

    let mut analysis_workers: HashMap<WorkerKind, Arc<AnalysisWorker>> = HashMap::new();
    for kind in [WorkerKind::File, WorkerKind::Directory, WorkerKind::Global] {
        analysis_workers.insert(kind, Arc::new(AnalysisWorker::new(kind, root, llm.clone(), cache.clone(), store.clone())));
    }
    let reconciler = ReconciliationWorker::new(store.clone(), config.clone());
    let graph_builder = GraphBuilder::new(store.clone(), graph.clone(), config.ingest_batch_size);
    let controller = RunController::new(queue.clone());

    let mut graph_build_succeeded = false;
    let drain = async {
        loop {
            if controller.is_settled(&run_id).await.map_err(anyhow::Error::from)? {
                break;
            }
            let mut progressed = false;
            for queue_name in ["file-analysis", "directory-analysis", "global-analysis", "reconcile-relationship", "graph-build"] {
                for _ in 0..worker_pool_size {
                    let Some(job) = queue.dequeue(queue_name).await.map_err(anyhow::Error::from)? else {
                        break;
                    };
                    progressed = true;
                    let is_graph_build = job.job_type == JobType::GraphBuild;
                    match dispatch(&job, &analysis_workers, &reconciler, &graph_builder).await {
                        Ok(()) => {
                            if is_graph_build {
                                graph_build_succeeded = true;
                            }
                            queue.ack(&job.id).await.map_err(anyhow::Error::from)?;
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %job.id, job_type = ?job.job_type, error = %e, "job failed");
                            queue.nack(&job.id, &e).await.map_err(anyhow::Error::from)?;
                        }
                    }
                }
            }
            if !progressed {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        Ok::<(), anyhow::Error>(())
    };
    tokio::time::timeout(Duration::from_secs(300), drain).await.context("run did not settle within the drain timeout")??;

    let _ = shutdown_tx.send(true);
    outbox_handle.await.context("outbox task panicked")?;

    let mut run = Run {
        run_id: run_id.clone(),
        root_path: root.display().to_string(),
        created_at: Utc::now(),
        status: RunStatus::Running,
    };
    let status = controller.finalize(&mut run, graph_build_succeeded).await?;
    let dead_letters = queue.dead_letters(&run_id).await?;

    // Reconcile the files table against disk now that the run has
    // settled, so a file removed mid-run (Scenario E, §4.7) doesn't
    // wait for a separately scheduled sweep.
    let cleaner = SelfCleaner::new(store.clone(), graph.clone());
    let files_marked_deleted = cleaner.mark(root).map_err(anyhow::Error::from)?;
    let files_swept = cleaner.sweep().await.map_err(anyhow::Error::from)?;

    Ok(RunSummary {
        run_id,
        status,
        file_job_count: started.file_job_count,
        dir_job_count: started.dir_job_count,
        dead_letter_count: dead_letters.len(),
        files_marked_deleted,
        files_swept,
    })
}

async fn dispatch(
    job: &Job,
    analysis_workers: &HashMap<WorkerKind, Arc<AnalysisWorker>>,
    reconciler: &ReconciliationWorker,
    graph_builder: &GraphBuilder,
) -> Result<(), TriError> {
    match job.job_type {
        JobType::FileAnalysis => analysis_workers[&WorkerKind::File].process(job).await,
        JobType::DirectoryAnalysis => analysis_workers[&WorkerKind::Directory].process(job).await,
        JobType::GlobalAnalysis => analysis_workers[&WorkerKind::Global].process(job).await,
        JobType::ReconcileRelationship => {
            let run_id = job.payload.get("run_id").and_then(|v| v.as_str()).unwrap_or(&job.run_id);
            let hash = job.payload.get("relationship_hash").and_then(|v| v.as_str()).unwrap_or_default();
            reconciler.reconcile(run_id, hash)
        }
        JobType::GraphBuild => graph_builder.build(&job.run_id).await,
    }
}
