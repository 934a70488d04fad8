// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Step retry with exponential backoff.
//!
//! Process steps call out to collaborators that may be briefly unreachable.
//! `run_with_retry` re-runs the operation under a [`RetryPolicy`] and, once
//! attempts run out, hands back a [`StepFailure`] the caller records on the
//! process record instead of propagating.

use std::fmt::Display;
use std::future::Future;

use tracing::warn;

use crate::domain::process::{RetryPolicy, StepOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub message: String,
    pub attempts: u32,
}

impl StepFailure {
    pub fn into_outcome(self) -> StepOutcome {
        StepOutcome::Failed {
            message: self.message,
            attempts: self.attempts,
        }
    }
}

pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    step: &str,
    mut operation: F,
) -> Result<T, StepFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                warn!(step, attempt, error = %e, "Step failed, retries exhausted");
                metrics::counter!("lifecycle_process_step_failures_total", "step" => step.to_string())
                    .increment(1);
                return Err(StepFailure {
                    message: e.to_string(),
                    attempts: attempt,
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(step, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Step failed, retrying");
                metrics::counter!("lifecycle_process_step_retries_total", "step" => step.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Run a step and fold the result into a [`StepOutcome`].
pub async fn run_step<E, F, Fut>(
    policy: &RetryPolicy,
    step: &str,
    operation: F,
) -> StepOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>, E>>,
    E: Display,
{
    match run_with_retry(policy, step, operation).await {
        Ok(detail) => StepOutcome::Completed { detail },
        Err(failure) => failure.into_outcome(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        let started = tokio::time::Instant::now();

        let result = run_with_retry(&policy, "disable_portal", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("connection refused")
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        let outcome = run_step(&policy, "generate_letter", || async {
            Err::<Option<String>, _>("template missing")
        })
        .await;

        assert_eq!(
            outcome,
            StepOutcome::Failed {
                message: "template missing".to_string(),
                attempts: 3
            }
        );
    }
}
