//! `RunController` (§4.9 supplement): owns the
//! `running -> completed | completed-with-dead-letters | failed`
//! transition by polling job/dead-letter counts for a run.

use std::sync::Arc;

use tri_core::{Run, RunStatus, TriError};
use tri_queue::JobQueue;

/// Decides and records a run's terminal status once its jobs settle.
pub struct RunController {
    queue: Arc<dyn JobQueue>,
}

impl RunController {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// `true` once every job for the run has reached a terminal state
    /// (the graph-build finalizer job included).
    pub async fn is_settled(&self, run_id: &str) -> Result<bool, TriError> {
        Ok(self.queue.run_progress(run_id).await.map_err(TriError::from)?.is_done())
    }

    /// Computes and applies the terminal status for `run`, once settled.
    /// `graph_build_succeeded` distinguishes `failed` (the graph-build
    /// job itself dead-lettered) from `completed-with-dead-letters`
    /// (some upstream job dead-lettered, but graph-build still ran).
    pub async fn finalize(&self, run: &mut Run, graph_build_succeeded: bool) -> Result<RunStatus, TriError> {
        let dead_letters = self.queue.dead_letters(&run.run_id).await.map_err(TriError::from)?;
        let status = if !graph_build_succeeded {
            RunStatus::Failed
        } else if dead_letters.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithDeadLetters
        };
        run.finish(status);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tri_core::{Job, JobStatus, JobType};
    use tri_queue::{MemoryJobQueue, RetryPolicy};

    #[tokio::test]
    async fn settles_to_completed_with_no_dead_letters() {
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default()));
        let mut job = Job::new("run-1", JobType::FileAnalysis, serde_json::json!({}));
        job.paused = false;
        job.status = JobStatus::Waiting;
        let id = job.id.clone();
        queue.enqueue(job).await.unwrap();
        queue.dequeue("file-analysis").await.unwrap();
        queue.ack(&id).await.unwrap();

        let controller = RunController::new(queue);
        assert!(controller.is_settled("run-1").await.unwrap());

        let mut run = Run::new("/repo", Utc::now());
        run.run_id = "run-1".to_string();
        let status = controller.finalize(&mut run, true).await.unwrap();
        assert_eq!(status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn settles_to_completed_with_dead_letters() {
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::new(1, std::time::Duration::from_millis(1))));
        let mut job = Job::new("run-1", JobType::FileAnalysis, serde_json::json!({}));
        job.paused = false;
        job.status = JobStatus::Waiting;
        let id = job.id.clone();
        queue.enqueue(job).await.unwrap();
        queue.dequeue("file-analysis").await.unwrap();
        let fatal = tri_core::TriError::Fatal {
            code: tri_core::ErrorCode::ScoutContractViolation,
            message: "boom".into(),
        };
        queue.nack(&id, &fatal).await.unwrap();

        let controller = RunController::new(queue);
        let mut run = Run::new("/repo", Utc::now());
        run.run_id = "run-1".to_string();
        let status = controller.finalize(&mut run, true).await.unwrap();
        assert_eq!(status, RunStatus::CompletedWithDeadLetters);
    }

    #[tokio::test]
    async fn graph_build_failure_is_failed_regardless_of_dead_letters() {
        let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default()));
        let controller = RunController::new(queue);
        let mut run = Run::new("/repo", Utc::now());
        let status = controller.finalize(&mut run, false).await.unwrap();
        assert_eq!(status, RunStatus::Failed);
    }
}
