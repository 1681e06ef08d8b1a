// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workers: analysis, validation, reconciliation, graph-build, the
//! self-cleaning reconciler, and the run-lifecycle controller.
#![warn(missing_docs)]

mod analysis;
mod graph_builder;
mod reconciliation;
mod run_controller;
mod self_cleaner;
mod validation;

pub use analysis::AnalysisWorker;
pub use graph_builder::GraphBuilder;
pub use reconciliation::ReconciliationWorker;
pub use run_controller::RunController;
pub use self_cleaner::SelfCleaner;
pub use validation::{AnalysisFinding, ValidationWorker};

use tri_core::{Job, JobStatus, JobType};

/// Builds a ready-to-dequeue `reconcile-relationship` job (§4.4 step 5).
/// Unlike Scout's start-of-run jobs, this is created mid-run after the
/// manifest is already live, so it is never paused.
pub(crate) fn reconcile_job(run_id: &str, hash: &str) -> Job {
    let mut job = Job::new(
        run_id,
        JobType::ReconcileRelationship,
        serde_json::json!({ "run_id": run_id, "relationship_hash": hash }),
    );
    job.paused = false;
    job.status = JobStatus::Waiting;
    job
}
