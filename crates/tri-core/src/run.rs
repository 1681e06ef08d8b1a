//! The run: one invocation of the pipeline over a root path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal states a run settles into (§7 "User-visible behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithDeadLetters,
    Failed,
}

impl RunStatus {
    /// A run never leaves any of its three terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One invocation of the pipeline over a root path.
///
/// Created by Scout; status transitions on explicit events only; never
/// mutated after a terminal state is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub root_path: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl Run {
    #[must_use]
    pub fn new(root_path: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            root_path: root_path.into(),
            created_at,
            status: RunStatus::Running,
        }
    }

    /// Transitions to a terminal status. Returns `false` without
    /// mutating if the run is already terminal, matching the "never
    /// mutated after terminal state" invariant.
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_starts_running() {
        let run = Run::new("/repo", Utc::now());
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn finishing_a_terminal_run_is_a_no_op() {
        let mut run = Run::new("/repo", Utc::now());
        assert!(run.finish(RunStatus::Completed));
        assert!(!run.finish(RunStatus::Failed));
        assert_eq!(run.status, RunStatus::Completed);
    }
}
