// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long-running process kinds and the step retry policy they share.
//!
//! Processes are a closed set. Each variant carries the id of the record it
//! drives; everything else is re-read from the store when the process runs,
//! which is what lets a restarted runtime pick a process up again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::reinstatement::ReinstatementId;
use crate::domain::repository::RepositoryError;
use crate::domain::termination::TerminationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleProcess {
    Termination { termination_id: TerminationId },
    Reinstatement { request_id: ReinstatementId },
}

impl LifecycleProcess {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleProcess::Termination { .. } => "termination",
            LifecycleProcess::Reinstatement { .. } => "reinstatement",
        }
    }
}

impl std::fmt::Display for LifecycleProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleProcess::Termination { termination_id } => {
                write!(f, "termination/{}", termination_id)
            }
            LifecycleProcess::Reinstatement { request_id } => {
                write!(f, "reinstatement/{}", request_id)
            }
        }
    }
}

/// Failure of one step after its retries ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub step: String,
    pub message: String,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed { detail: Option<String> },
    Failed { message: String, attempts: u32 },
}

impl StepOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed { .. })
    }
}

/// Exponential backoff: `initial_delay`, doubling, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_delay.saturating_mul(2_u32.pow(exponent));
        delay.min(self.max_delay)
    }

    /// No waiting between attempts; used by tests and one-shot CLI runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Failures that stop a process outright. Step failures are not among them:
/// those are recorded on the process record and the process moves on.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{process} could not record its start: {source}")]
    StartFailed {
        process: LifecycleProcess,
        #[source]
        source: RepositoryError,
    },

    #[error("No record found for {0}")]
    RecordNotFound(LifecycleProcess),

    #[error("{0} is not running on this host")]
    NotRunning(LifecycleProcess),

    #[error("{process} cannot be cancelled: {reason}")]
    NotCancellable {
        process: LifecycleProcess,
        reason: String,
    },

    #[error("{process} task ended abnormally: {message}")]
    Aborted {
        process: LifecycleProcess,
        message: String,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(6, Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }

    #[test]
    fn test_process_display() {
        let id = Uuid::nil();
        let process = LifecycleProcess::Termination { termination_id: TerminationId(id) };
        assert_eq!(process.to_string(), format!("termination/{}", id));
        assert_eq!(process.kind(), "termination");
    }
}
