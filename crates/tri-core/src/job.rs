//! Queue-level job types and the tagged worker-kind enumeration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed enumeration of job kinds the queue carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    FileAnalysis,
    DirectoryAnalysis,
    GlobalAnalysis,
    ReconcileRelationship,
    GraphBuild,
}

impl JobType {
    /// The queue name this job type is delivered on.
    #[must_use]
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::FileAnalysis => "file-analysis",
            Self::DirectoryAnalysis => "directory-analysis",
            Self::GlobalAnalysis => "global-analysis",
            Self::ReconcileRelationship => "reconcile-relationship",
            Self::GraphBuild => "graph-build",
        }
    }
}

/// Tagged worker-kind enumeration, replacing an inheritance hierarchy.
///
/// The reconciliation weight table (`tri-config::PipelineConfig::reconcile_weights`)
/// is keyed by this enum rather than by a job type, since `Validation`
/// and `Reconcile` workers do not themselves produce weighted evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    File,
    Directory,
    Global,
    Validation,
    Reconcile,
    GraphBuild,
}

impl WorkerKind {
    /// Authority ranking used when Reconciliation picks the
    /// authoritative evidence payload: `global > directory > file`.
    /// Workers that do not produce evidence rank below all three.
    #[must_use]
    pub fn authority_rank(&self) -> u8 {
        match self {
            Self::Global => 3,
            Self::Directory => 2,
            Self::File => 1,
            Self::Validation | Self::Reconcile | Self::GraphBuild => 0,
        }
    }

    /// Config key used to look up this kind's reconciliation weight.
    #[must_use]
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Global => "global",
            Self::Validation => "validation",
            Self::Reconcile => "reconcile",
            Self::GraphBuild => "graph_build",
        }
    }
}

/// Terminal and in-flight states of the job state machine (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    WaitingChildren,
    Waiting,
    Active,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    /// `true` for the two states a job never leaves once reached.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLetter)
    }
}

/// A unit of work delivered through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub run_id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub status: JobStatus,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    /// Jobs start `waiting` (or `waiting_children` if dependency-gated)
    /// but are created *paused*; Scout flips them to `waiting` only
    /// after the manifest is durable (§4.1's "why paused-then-resume").
    pub paused: bool,
}

impl Job {
    #[must_use]
    pub fn new(run_id: impl Into<String>, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            job_type,
            payload,
            attempt: 0,
            status: JobStatus::Created,
            parents: Vec::new(),
            children: Vec::new(),
            paused: true,
        }
    }

    /// Declares `child_id` as a dependency: `self` cannot become
    /// `active` until `child_id` reaches `completed`.
    pub fn add_child(&mut self, child_id: impl Into<String>) {
        self.children.push(child_id.into());
        if self.status == JobStatus::Created && !self.children.is_empty() {
            self.status = JobStatus::WaitingChildren;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_paused_and_created() {
        let job = Job::new("run-1", JobType::FileAnalysis, serde_json::json!({}));
        assert!(job.paused);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.attempt, 0);
    }

    #[test]
    fn adding_a_child_moves_to_waiting_children() {
        let mut job = Job::new("run-1", JobType::GraphBuild, serde_json::json!({}));
        job.add_child("child-1");
        assert_eq!(job.status, JobStatus::WaitingChildren);
    }

    #[test]
    fn authority_rank_orders_global_above_directory_above_file() {
        assert!(WorkerKind::Global.authority_rank() > WorkerKind::Directory.authority_rank());
        assert!(WorkerKind::Directory.authority_rank() > WorkerKind::File.authority_rank());
    }
}
