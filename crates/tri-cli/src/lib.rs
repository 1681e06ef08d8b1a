// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `tri` command-line process wrapper: `run`, `status`, and `doctor`.
#![warn(missing_docs)]

pub mod doctor;
pub mod runner;
pub mod status;

pub use doctor::{doctor, DoctorReport};
pub use runner::{run_pipeline, RunSummary};
pub use status::{report, StatusReport};
