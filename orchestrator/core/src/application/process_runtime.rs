// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Runtime
//!
//! Runs termination and reinstatement processes as tokio tasks and keeps a
//! table of what is running on this host.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Start, cancel, await and resume [`LifecycleProcess`]es
//! - **Collaborators:** [`TerminationWorkflow`], [`ReinstatementWorkflow`]
//!
//! A process carries only the id of its record. Everything else is re-read
//! from the store when it runs, so `resume_incomplete` after a restart is the
//! same code path as a fresh start. Dispatch from a process to its workflow
//! is the single `match` in [`ProcessRuntime::spawn`].
//!
//! Cancellation and shutdown are different things. `cancel` asks a process
//! to stop and records the outcome (a FAILED termination, a REJECTED
//! request). `shutdown` aborts the tasks and records nothing, leaving the
//! store as it was for the next `resume_incomplete`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::application::reinstatement::{
    ReinstatementError, ReinstatementWorkflow, RequestReinstatement,
};
use crate::application::repository_factory::LifecycleRepositories;
use crate::application::termination::{TerminateAgentRequest, TerminationError, TerminationWorkflow};
use crate::domain::clock::Clock;
use crate::domain::lifecycle_config::LifecycleConfigSpec;
use crate::domain::process::{LifecycleProcess, ProcessError, RetryPolicy};
use crate::domain::reinstatement::{
    ReinstatementDecision, ReinstatementId, ReinstatementRequest, ReinstatementStatus,
    DEFAULT_DECISION_TIMEOUT_DAYS,
};
use crate::domain::termination::{TerminationRecord, WorkflowStatus};
use crate::infrastructure::collaborators::Collaborators;
use crate::infrastructure::decision_gate::DecisionGate;
use crate::infrastructure::event_bus::EventBus;

/// Tunables shared by both workflows.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub retry: RetryPolicy,
    pub decision_timeout: chrono::Duration,
    /// How often a waiting reinstatement re-reads its request
    pub poll_interval: Duration,
    pub approver_email: String,
}

impl ProcessSettings {
    pub fn from_config(spec: &LifecycleConfigSpec) -> Self {
        Self {
            retry: spec.retry.policy(),
            decision_timeout: chrono::Duration::days(i64::from(spec.reinstatement.decision_timeout_days)),
            poll_interval: Duration::from_secs(spec.reinstatement.poll_interval_seconds),
            approver_email: spec.reinstatement.approver_email.clone(),
        }
    }
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            decision_timeout: chrono::Duration::days(DEFAULT_DECISION_TIMEOUT_DAYS),
            poll_interval: Duration::from_secs(300),
            approver_email: "reinstatements@localhost".to_string(),
        }
    }
}

/// Everything a workflow needs from the outside.
#[derive(Clone)]
pub struct ProcessContext {
    pub repositories: LifecycleRepositories,
    pub collaborators: Collaborators,
    pub event_bus: EventBus,
    pub gate: DecisionGate,
    pub clock: Arc<dyn Clock>,
    pub settings: ProcessSettings,
}

/// Cancellation request for one process, with who asked for it.
#[derive(Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    requested_by: Arc<Mutex<Option<String>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first caller's identity is kept.
    pub fn cancel(&self, by: &str) {
        {
            let mut slot = self.requested_by.lock();
            if slot.is_none() {
                *slot = Some(by.to_string());
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn requested_by(&self) -> String {
        self.requested_by
            .lock()
            .clone()
            .unwrap_or_else(|| "operator".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Termination(WorkflowStatus),
    Reinstatement(ReinstatementStatus),
}

impl ProcessOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            ProcessOutcome::Termination(status) => status.as_str(),
            ProcessOutcome::Reinstatement(status) => status.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The process runs here and was asked to stop.
    Signalled,
    /// Nothing runs here; the cancellation was written to the store.
    Recorded,
}

type ProcessTask = JoinHandle<Result<ProcessOutcome, ProcessError>>;

struct ProcessHandle {
    cancel: CancelSignal,
    task: Option<ProcessTask>,
}

impl ProcessHandle {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

pub struct ProcessRuntime {
    terminations: Arc<TerminationWorkflow>,
    reinstatements: Arc<ReinstatementWorkflow>,
    table: DashMap<LifecycleProcess, ProcessHandle>,
}

impl ProcessRuntime {
    pub fn new(ctx: ProcessContext) -> Self {
        Self {
            terminations: Arc::new(TerminationWorkflow::new(ctx.clone())),
            reinstatements: Arc::new(ReinstatementWorkflow::new(ctx)),
            table: DashMap::new(),
        }
    }

    pub fn terminations(&self) -> &TerminationWorkflow {
        &self.terminations
    }

    pub fn reinstatements(&self) -> &ReinstatementWorkflow {
        &self.reinstatements
    }

    /// `TerminateAgent`: flip the agent and create the record now, run the
    /// steps in the background.
    pub async fn terminate_agent(
        &self,
        request: TerminateAgentRequest,
    ) -> Result<TerminationRecord, TerminationError> {
        let record = self.terminations.begin(request).await?;
        self.spawn(LifecycleProcess::Termination {
            termination_id: record.id,
        });
        Ok(record)
    }

    /// `RequestReinstatement`: create the PENDING request now, wait for the
    /// decision in the background.
    pub async fn request_reinstatement(
        &self,
        request: RequestReinstatement,
    ) -> Result<ReinstatementRequest, ReinstatementError> {
        let created = self.reinstatements.request(request).await?;
        self.spawn(LifecycleProcess::Reinstatement {
            request_id: created.id,
        });
        Ok(created)
    }

    pub async fn submit_decision(
        &self,
        request_id: ReinstatementId,
        decision: ReinstatementDecision,
    ) -> Result<ReinstatementRequest, ReinstatementError> {
        self.reinstatements.submit_decision(request_id, decision).await
    }

    /// Start a process unless it is already running here. Returns whether a
    /// task was started.
    pub fn spawn(&self, process: LifecycleProcess) -> bool {
        let cancel = CancelSignal::new();
        let mut handle = match self.table.entry(process) {
            Entry::Occupied(entry) if entry.get().is_running() => return false,
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => entry.insert(ProcessHandle {
                cancel: cancel.clone(),
                task: None,
            }),
        };
        handle.cancel = cancel.clone();

        let terminations = self.terminations.clone();
        let reinstatements = self.reinstatements.clone();
        let span = info_span!("process", process = %process, kind = process.kind());
        let task = tokio::spawn(
            async move {
                metrics::gauge!("lifecycle_process_active").increment(1.0);
                let result = match process {
                    LifecycleProcess::Termination { termination_id } => terminations
                        .run(termination_id, &cancel)
                        .await
                        .map(ProcessOutcome::Termination),
                    LifecycleProcess::Reinstatement { request_id } => reinstatements
                        .run(request_id, &cancel)
                        .await
                        .map(ProcessOutcome::Reinstatement),
                };
                metrics::gauge!("lifecycle_process_active").decrement(1.0);

                match &result {
                    Ok(outcome) => {
                        info!(status = outcome.status(), "Process finished");
                        metrics::counter!(
                            "lifecycle_process_finished_total",
                            "kind" => process.kind(),
                            "status" => outcome.status()
                        )
                        .increment(1);
                    }
                    Err(e) => {
                        error!(error = %e, "Process aborted");
                        metrics::counter!("lifecycle_process_aborted_total", "kind" => process.kind())
                            .increment(1);
                    }
                }
                result
            }
            .instrument(span),
        );
        handle.task = Some(task);

        metrics::counter!("lifecycle_process_started_total", "kind" => process.kind()).increment(1);
        true
    }

    /// Ask a process to stop. When it is not running here the cancellation
    /// is applied to the stored record directly.
    pub async fn cancel(&self, process: LifecycleProcess, by: &str) -> Result<CancelOutcome, ProcessError> {
        if let Some(handle) = self.table.get(&process) {
            if handle.is_running() {
                handle.cancel.cancel(by);
                info!(process = %process, by, "Cancellation signalled");
                return Ok(CancelOutcome::Signalled);
            }
        }

        let not_cancellable = |reason: String| ProcessError::NotCancellable { process, reason };
        match process {
            LifecycleProcess::Termination { termination_id } => {
                self.terminations
                    .cancel_persisted(termination_id, by)
                    .await
                    .map_err(|e| not_cancellable(e.to_string()))?;
            }
            LifecycleProcess::Reinstatement { request_id } => {
                self.reinstatements
                    .cancel_persisted(request_id, by)
                    .await
                    .map_err(|e| not_cancellable(e.to_string()))?;
            }
        }
        Ok(CancelOutcome::Recorded)
    }

    /// Wait for a process started on this host and take its result.
    pub async fn wait(&self, process: LifecycleProcess) -> Result<ProcessOutcome, ProcessError> {
        let task = self
            .table
            .get_mut(&process)
            .and_then(|mut handle| handle.task.take())
            .ok_or(ProcessError::NotRunning(process))?;

        let result = task.await.map_err(|e| ProcessError::Aborted {
            process,
            message: e.to_string(),
        });
        self.table.remove(&process);
        result?
    }

    /// Re-launch every process the store says is unfinished: termination
    /// records not COMPLETED/FAILED, PENDING requests, and APPROVED requests
    /// whose follow-up steps did not complete.
    pub async fn resume_incomplete(&self) -> Result<Vec<LifecycleProcess>, ProcessError> {
        let repos = &self.terminations.context().repositories;
        let mut candidates = Vec::new();

        for record in repos.terminations.find_unfinished().await? {
            candidates.push(LifecycleProcess::Termination {
                termination_id: record.id,
            });
        }
        for status in [ReinstatementStatus::Pending, ReinstatementStatus::Approved] {
            for request in repos.reinstatements.find_by_status(status).await? {
                candidates.push(LifecycleProcess::Reinstatement {
                    request_id: request.id,
                });
            }
        }

        let resumed: Vec<LifecycleProcess> = candidates.into_iter().filter(|p| self.spawn(*p)).collect();
        info!(count = resumed.len(), "Resumed incomplete processes");
        Ok(resumed)
    }

    /// Processes currently running on this host.
    pub fn running(&self) -> Vec<LifecycleProcess> {
        self.table
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop finished entries nobody waited for, logging their results.
    pub fn reap_finished(&self) -> usize {
        let finished: Vec<LifecycleProcess> = self
            .table
            .iter()
            .filter(|entry| !entry.value().is_running())
            .map(|entry| *entry.key())
            .collect();

        for process in &finished {
            if let Some((_, handle)) = self.table.remove(process) {
                if let Some(Ok(Err(e))) = handle.task.and_then(|t| t.now_or_never()) {
                    error!(process = %process, error = %e, "Reaped failed process");
                }
            }
        }
        finished.len()
    }

    /// Abort every task without recording anything.
    pub fn shutdown(&self) {
        for entry in self.table.iter() {
            if let Some(task) = &entry.value().task {
                task.abort();
            }
        }
        let count = self.table.len();
        self.table.clear();
        info!(aborted = count, "Process runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_signal_keeps_first_requester() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert_eq!(signal.requested_by(), "operator");

        signal.cancel("hr.lead");
        signal.cancel("someone.else");
        assert!(signal.is_cancelled());
        assert_eq!(signal.requested_by(), "hr.lead");
    }

    #[test]
    fn test_settings_from_config() {
        let mut spec = LifecycleConfigSpec::default();
        spec.reinstatement.decision_timeout_days = 10;
        spec.reinstatement.poll_interval_seconds = 60;
        let settings = ProcessSettings::from_config(&spec);
        assert_eq!(settings.decision_timeout, chrono::Duration::days(10));
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.retry.max_attempts, 3);
    }
}
