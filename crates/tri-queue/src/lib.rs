// SPDX-License-Identifier: MIT OR Apache-2.0
//! The durable job queue: at-least-once delivery, per-job retry with
//! exponential backoff, delayed delivery, a dead-letter queue, and
//! parent/child dependency gating (§4.8's job state machine).
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tri_core::{Job, JobStatus, JobType, TriError};

/// Errors surfaced by a [`JobQueue`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No job with the given id exists.
    #[error("no such job: {0}")]
    NotFound(String),
    /// The queue backend did not respond within its command timeout.
    #[error("queue command timed out")]
    Timeout,
}

impl From<QueueError> for TriError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Timeout => TriError::TransientExternal {
                code: tri_core::ErrorCode::QueueTimeout,
                message: e.to_string(),
                attempt: 1,
            },
            QueueError::NotFound(_) => TriError::NotFound {
                code: tri_core::ErrorCode::RelationshipNotFound,
                message: e.to_string(),
            },
        }
    }
}

/// Retry policy applied on [`JobQueue::nack`]: exponential backoff with
/// a cap on attempts before dead-lettering.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts before a retryable failure is dead-lettered anyway.
    pub max_attempts: u32,
    /// Backoff base duration; attempt `n`'s delay is `base * 2^(n-1)`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy from the pipeline configuration's
    /// `max_job_retries` / `job_backoff_base_ms`.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// The delay before attempt number `attempt` (1-indexed) is redelivered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// The durable job queue trait. Every method corresponds to one
/// queue-level operation from the external-interfaces contract.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job. Jobs created with `paused = true` are invisible
    /// to [`dequeue`](JobQueue::dequeue) until [`resume_run`](JobQueue::resume_run) is called.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Flips `paused` off for every job belonging to `run_id`, making
    /// ready jobs visible to dequeue (§4.1's pause-then-resume sequence).
    async fn resume_run(&self, run_id: &str) -> Result<(), QueueError>;

    /// Removes and returns the next ready job on `queue_name`, if any:
    /// not paused, not delayed, no incomplete children, in FIFO order.
    async fn dequeue(&self, queue_name: &str) -> Result<Option<Job>, QueueError>;

    /// Marks a job completed and wakes any parent whose last pending
    /// child this was.
    async fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    /// Reports a failure. Retryable errors are redelivered with
    /// exponential backoff up to the policy's `max_attempts`; anything
    /// else — or exhaustion — dead-letters the job and fails its parents.
    async fn nack(&self, job_id: &str, error: &TriError) -> Result<(), QueueError>;

    /// Jobs currently in the dead-letter queue for a run (the
    /// `failed-jobs` view of §7's propagation policy).
    async fn dead_letters(&self, run_id: &str) -> Result<Vec<Job>, QueueError>;

    /// Reads one job's current state without mutating it.
    async fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError>;

    /// All job ids for a run, grouped by terminal/non-terminal state —
    /// used by `tri-workers`' `RunController` to decide when a run finishes.
    async fn run_progress(&self, run_id: &str) -> Result<RunProgress, QueueError>;
}

/// Snapshot of a run's job completion state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunProgress {
    /// Total jobs ever enqueued for this run.
    pub total: usize,
    /// Jobs in a terminal `completed` state.
    pub completed: usize,
    /// Jobs in a terminal `dead_letter` state.
    pub dead_lettered: usize,
}

impl RunProgress {
    /// `true` once every job for the run has reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completed + self.dead_lettered >= self.total
    }
}

struct Record {
    job: Job,
    ready_at: Instant,
    seq: u64,
    pending_children: HashSet<String>,
}

/// In-process [`JobQueue`]. Suitable as the default backend and for
/// tests; a production deployment backs the trait with a durable
/// broker instead, but the dependency-gating and backoff semantics are
/// identical by contract.
pub struct MemoryJobQueue {
    retry_policy: RetryPolicy,
    records: Mutex<HashMap<String, Record>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl MemoryJobQueue {
    /// Creates an empty queue with the given retry policy.
    #[must_use]
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            records: Mutex::new(HashMap::new()),
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn is_ready(record: &Record, now: Instant) -> bool {
        !record.job.paused
            && record.job.status == JobStatus::Waiting
            && record.ready_at <= now
            && record.pending_children.is_empty()
    }

    /// Wakes parents that were waiting on `completed_child_id`,
    /// promoting them to `waiting` once every child is done, or to
    /// `dead_letter` propagation if `child_failed` is set.
    fn notify_parents(records: &mut HashMap<String, Record>, completed_child_id: &str, child_failed: bool) {
        let parent_ids: Vec<String> = records
            .values()
            .filter(|r| r.job.children.iter().any(|c| c == completed_child_id))
            .map(|r| r.job.id.clone())
            .collect();
        for parent_id in parent_ids {
            if let Some(parent) = records.get_mut(&parent_id) {
                if child_failed {
                    parent.job.status = JobStatus::Failed;
                    continue;
                }
                parent.pending_children.remove(completed_child_id);
                if parent.pending_children.is_empty() && parent.job.status == JobStatus::WaitingChildren {
                    parent.job.status = JobStatus::Waiting;
                    parent.ready_at = Instant::now();
                }
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let pending_children: HashSet<String> = job.children.iter().cloned().collect();
        let id = job.id.clone();
        let seq = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        records.insert(
            id,
            Record {
                job,
                ready_at: Instant::now(),
                seq,
                pending_children,
            },
        );
        Ok(())
    }

    async fn resume_run(&self, run_id: &str) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        for record in records.values_mut() {
            if record.job.run_id == run_id {
                record.job.paused = false;
                if record.job.status == JobStatus::Created && record.pending_children.is_empty() {
                    record.job.status = JobStatus::Waiting;
                } else if record.job.status == JobStatus::Created {
                    record.job.status = JobStatus::WaitingChildren;
                }
            }
        }
        Ok(())
    }

    async fn dequeue(&self, queue_name: &str) -> Result<Option<Job>, QueueError> {
        let mut records = self.records.lock().await;
        let now = Instant::now();
        let mut candidates: Vec<(String, Instant, u64)> = records
            .iter()
            .filter(|(_, r)| r.job.job_type.queue_name() == queue_name && Self::is_ready(r, now))
            .map(|(id, r)| (id.clone(), r.ready_at, r.seq))
            .collect();
        candidates.sort_by_key(|(_, ready_at, seq)| (*ready_at, *seq));
        let Some((id, ..)) = candidates.into_iter().next() else {
            return Ok(None);
        };
        let record = records.get_mut(&id).expect("candidate id must exist");
        record.job.status = JobStatus::Active;
        record.job.attempt += 1;
        Ok(Some(record.job.clone()))
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        {
            let record = records.get_mut(job_id).ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
            record.job.status = JobStatus::Completed;
        }
        Self::notify_parents(&mut records, job_id, false);
        Ok(())
    }

    async fn nack(&self, job_id: &str, error: &TriError) -> Result<(), QueueError> {
        let dead_lettered;
        {
            let mut records = self.records.lock().await;
            let record = records.get_mut(job_id).ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
            if error.is_retryable() && record.job.attempt < self.retry_policy.max_attempts {
                record.job.status = JobStatus::Waiting;
                record.ready_at = Instant::now() + self.retry_policy.delay_for(record.job.attempt);
                dead_lettered = false;
            } else {
                record.job.status = JobStatus::DeadLetter;
                dead_lettered = true;
            }
        }
        if dead_lettered {
            let mut records = self.records.lock().await;
            Self::notify_parents(&mut records, job_id, true);
        }
        Ok(())
    }

    async fn dead_letters(&self, run_id: &str) -> Result<Vec<Job>, QueueError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.job.run_id == run_id && r.job.status == JobStatus::DeadLetter)
            .map(|r| r.job.clone())
            .collect())
    }

    async fn job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        let records = self.records.lock().await;
        Ok(records.get(job_id).map(|r| r.job.clone()))
    }

    async fn run_progress(&self, run_id: &str) -> Result<RunProgress, QueueError> {
        let records = self.records.lock().await;
        let mut progress = RunProgress::default();
        for record in records.values().filter(|r| r.job.run_id == run_id) {
            progress.total += 1;
            match record.job.status {
                JobStatus::Completed => progress.completed += 1,
                JobStatus::DeadLetter => progress.dead_lettered += 1,
                _ => {}
            }
        }
        Ok(progress)
    }
}

/// Builds a `graph-build` finalizer job that declares every id in
/// `parent_job_ids` as a child dependency, per §4.1 step 5.
#[must_use]
pub fn graph_build_finalizer(run_id: &str, analysis_job_ids: &[String]) -> Job {
    let mut job = Job::new(run_id, JobType::GraphBuild, serde_json::json!({ "run_id": run_id }));
    for id in analysis_job_ids {
        job.add_child(id.clone());
    }
    job
}
