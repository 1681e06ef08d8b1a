// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scout: the start-of-run actor. Walks a run's root filesystem tree,
//! seeds the manifest, and enqueues every analysis job paused before
//! releasing them together (§4.1), guarded by a lease so only one
//! process scans a given root at a time (§5).
#![warn(missing_docs)]

mod globs;
mod lease;
mod scout;
mod walker;

pub use globs::{ExcludeGlobs, WalkDecision};
pub use lease::{LeaseError, LeaseHandle, LeaseManager};
pub use scout::{Scout, ScoutError, StartedRun};
pub use walker::{WalkResult, WalkedDir, WalkedFile, walk};
