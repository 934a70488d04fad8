// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Termination Workflow
//!
//! `begin` is the synchronous half of `TerminateAgent`: it validates the
//! request, then flips the agent to TERMINATED and inserts the
//! [`TerminationRecord`] in one repository unit. `run` is the background
//! half: it executes the outstanding steps in order, persisting each outcome
//! before moving on.
//!
//! Steps are best-effort. A step that still fails after its retries is
//! written to the record's error list and the process continues; the record
//! ends COMPLETED regardless. Only the "started" write is fatal.
//!
//! Before each step the stored status is re-read. A record that another host
//! (or `cancel_persisted`) has already finished stops the local run.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::application::process_runtime::{CancelSignal, ProcessContext};
use crate::application::retry::{run_step, run_with_retry};
use crate::domain::agent::{AgentId, TerminationDetails};
use crate::domain::archive::DataArchive;
use crate::domain::collaborators::{Notification, NotificationKind, TerminationLetter};
use crate::domain::events::TerminationEvent;
use crate::domain::process::{LifecycleProcess, ProcessError, StepOutcome};
use crate::domain::repository::RepositoryError;
use crate::domain::termination::{TerminationId, TerminationRecord, TerminationStep, WorkflowStatus};

#[derive(Debug, thiserror::Error)]
pub enum TerminationError {
    #[error("Agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("Agent {0} is already terminated")]
    AlreadyTerminated(AgentId),

    #[error("Invalid termination request: {0}")]
    InvalidRequest(String),

    #[error("Termination {0} not found")]
    NotFound(TerminationId),

    #[error("Termination {id} already finished ({status})")]
    AlreadyFinished { id: TerminationId, status: WorkflowStatus },

    #[error("Agent changed concurrently: {0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for TerminationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => TerminationError::Conflict(msg),
            other => TerminationError::Repository(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminateAgentRequest {
    pub agent_id: AgentId,
    pub reason: String,
    pub reason_code: String,
    pub effective_date: NaiveDate,
    pub initiated_by: String,
}

pub struct TerminationWorkflow {
    ctx: ProcessContext,
}

impl TerminationWorkflow {
    pub fn new(ctx: ProcessContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    pub async fn begin(&self, request: TerminateAgentRequest) -> Result<TerminationRecord, TerminationError> {
        if request.reason.trim().is_empty() {
            return Err(TerminationError::InvalidRequest("reason is required".to_string()));
        }
        if request.reason_code.trim().is_empty() {
            return Err(TerminationError::InvalidRequest("reason code is required".to_string()));
        }

        let repos = &self.ctx.repositories;
        let agent = repos
            .agents
            .get(request.agent_id)
            .await?
            .ok_or(TerminationError::AgentNotFound(request.agent_id))?;
        if agent.is_terminated() {
            return Err(TerminationError::AlreadyTerminated(agent.id));
        }

        let now = self.ctx.clock.now();
        let record = TerminationRecord::new(
            agent.id,
            request.reason.clone(),
            request.reason_code.clone(),
            request.effective_date,
            request.initiated_by.clone(),
            now,
        );
        let expected_version = agent.version;
        let mut terminated = agent;
        terminated.terminate(TerminationDetails {
            reason: request.reason,
            reason_code: request.reason_code,
            effective_date: request.effective_date,
            terminated_at: now,
        });

        repos.terminations.begin(&record, &terminated, expected_version).await?;

        info!(
            termination_id = %record.id,
            agent_id = %record.agent_id,
            reason_code = %record.reason_code,
            initiated_by = %record.initiated_by,
            "Agent terminated, termination process created"
        );
        self.ctx
            .event_bus
            .publish_termination_event(TerminationEvent::TerminationStarted {
                termination_id: record.id,
                agent_id: record.agent_id,
                reason_code: record.reason_code.clone(),
                started_at: now,
            });
        Ok(record)
    }

    pub async fn get(&self, id: TerminationId) -> Result<TerminationRecord, TerminationError> {
        self.ctx
            .repositories
            .terminations
            .get(id)
            .await?
            .ok_or(TerminationError::NotFound(id))
    }

    pub async fn run(&self, id: TerminationId, cancel: &CancelSignal) -> Result<WorkflowStatus, ProcessError> {
        let process = LifecycleProcess::Termination { termination_id: id };
        let repo = &self.ctx.repositories.terminations;

        let mut record = repo.get(id).await?.ok_or(ProcessError::RecordNotFound(process))?;
        if record.workflow_status.is_finished() {
            debug!(termination_id = %id, status = %record.workflow_status, "Termination already finished");
            return Ok(record.workflow_status);
        }

        record.mark_started(self.ctx.clock.now());
        repo.save_progress(&record)
            .await
            .map_err(|source| ProcessError::StartFailed { process, source })?;

        info!(
            termination_id = %id,
            agent_id = %record.agent_id,
            steps = record.unattempted_steps().len(),
            "Termination process running"
        );

        for step in record.unattempted_steps() {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(status) = self.finished_elsewhere(id).await {
                info!(termination_id = %id, status = %status, "Termination finished elsewhere, stopping");
                return Ok(status);
            }

            let outcome = self.execute(step, &record).await;
            let now = self.ctx.clock.now();
            record.record_step(step, &outcome, now);

            match repo.save_progress(&record).await {
                Ok(()) => {}
                Err(RepositoryError::InvalidState(_)) => {
                    let status = self.finished_elsewhere(id).await.unwrap_or(WorkflowStatus::Failed);
                    info!(termination_id = %id, status = %status, "Termination finished elsewhere, stopping");
                    return Ok(status);
                }
                Err(e) => {
                    // The outcome stays in memory and goes out with the next write
                    warn!(termination_id = %id, step = %step, error = %e, "Failed to persist step outcome");
                }
            }

            self.ctx
                .event_bus
                .publish_termination_event(TerminationEvent::TerminationStepRecorded {
                    termination_id: id,
                    agent_id: record.agent_id,
                    step: step.as_str().to_string(),
                    succeeded: outcome.is_completed(),
                    recorded_at: now,
                });
        }

        let now = self.ctx.clock.now();
        let status = if cancel.is_cancelled() && !record.unattempted_steps().is_empty() {
            skip_outstanding(&mut record, &cancel.requested_by(), now);
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        record.finish(status, now);

        let policy = self.ctx.settings.retry;
        let finished = &record;
        run_with_retry(&policy, "finish_termination", || async move {
            match repo.save_progress(finished).await {
                // Someone else closed it first; their status stands
                Err(RepositoryError::InvalidState(_)) => Ok(()),
                other => other,
            }
        })
        .await
        .map_err(|failure| {
            ProcessError::Repository(RepositoryError::Database(format!(
                "final write failed after {} attempts: {}",
                failure.attempts, failure.message
            )))
        })?;

        info!(
            termination_id = %id,
            agent_id = %record.agent_id,
            status = %status,
            errors = record.errors.len(),
            "Termination process finished"
        );
        self.ctx
            .event_bus
            .publish_termination_event(TerminationEvent::TerminationFinished {
                termination_id: id,
                agent_id: record.agent_id,
                status,
                error_count: record.errors.len(),
                finished_at: now,
            });
        Ok(status)
    }

    /// Cancel a termination that is not running on this host: remaining
    /// steps are recorded as skipped and the record is closed FAILED.
    pub async fn cancel_persisted(&self, id: TerminationId, by: &str) -> Result<TerminationRecord, TerminationError> {
        let mut record = self.get(id).await?;
        if record.workflow_status.is_finished() {
            return Err(TerminationError::AlreadyFinished {
                id,
                status: record.workflow_status,
            });
        }

        let now = self.ctx.clock.now();
        skip_outstanding(&mut record, by, now);
        record.finish(WorkflowStatus::Failed, now);
        self.ctx.repositories.terminations.save_progress(&record).await?;

        info!(termination_id = %id, by, skipped = record.errors.len(), "Termination cancelled");
        self.ctx
            .event_bus
            .publish_termination_event(TerminationEvent::TerminationFinished {
                termination_id: id,
                agent_id: record.agent_id,
                status: WorkflowStatus::Failed,
                error_count: record.errors.len(),
                finished_at: now,
            });
        Ok(record)
    }

    async fn finished_elsewhere(&self, id: TerminationId) -> Option<WorkflowStatus> {
        match self.ctx.repositories.terminations.get(id).await {
            Ok(Some(stored)) if stored.workflow_status.is_finished() => Some(stored.workflow_status),
            Ok(_) => None,
            Err(e) => {
                debug!(termination_id = %id, error = %e, "Status re-read failed, continuing");
                None
            }
        }
    }

    async fn execute(&self, step: TerminationStep, record: &TerminationRecord) -> StepOutcome {
        let policy = self.ctx.settings.retry;
        let agent_id = record.agent_id;
        let collaborators = &self.ctx.collaborators;
        let repos = &self.ctx.repositories;

        match step {
            TerminationStep::DisablePortal => {
                let portal = &collaborators.portal;
                let outcome = run_step(&policy, step.as_str(), || async move {
                    portal.disable(agent_id).await.map(|_| None)
                })
                .await;
                if outcome.is_completed() {
                    self.record_access(agent_id, Some(false), None).await;
                }
                outcome
            }
            TerminationStep::StopPayouts => {
                let commissions = &collaborators.commissions;
                let outcome = run_step(&policy, step.as_str(), || async move {
                    commissions.stop_payouts(agent_id).await.map(|_| None)
                })
                .await;
                if outcome.is_completed() {
                    self.record_access(agent_id, None, Some(false)).await;
                }
                outcome
            }
            TerminationStep::GenerateLetter => {
                let documents = &collaborators.documents;
                run_step(&policy, step.as_str(), || async move {
                    let agent = repos.agent_for_step(agent_id).await?;
                    let letter = TerminationLetter {
                        agent_id,
                        agent_name: agent.name,
                        reason: record.reason.clone(),
                        reason_code: record.reason_code.clone(),
                        effective_date: record.effective_date,
                    };
                    documents
                        .render_termination_letter(&letter)
                        .await
                        .map(Some)
                        .map_err(|e| e.to_string())
                })
                .await
            }
            TerminationStep::ArchiveData => {
                let clock = &self.ctx.clock;
                run_step(&policy, step.as_str(), || async move {
                    let agent = repos.agent_for_step(agent_id).await?;
                    let licenses = repos.licenses.find_by_agent(agent_id).await.map_err(|e| e.to_string())?;
                    let archive =
                        DataArchive::capture(&agent, &licenses, record, clock.now()).map_err(|e| e.to_string())?;
                    repos.archives.save(&archive).await.map_err(|e| e.to_string())?;
                    Ok::<_, String>(Some(archive.id.0.to_string()))
                })
                .await
            }
            TerminationStep::SendNotifications => {
                let notifications = &collaborators.notifications;
                run_step(&policy, step.as_str(), || async move {
                    let agent = repos.agent_for_step(agent_id).await?;
                    let notification = Notification {
                        kind: NotificationKind::TerminationNotice,
                        recipient: agent.email,
                        subject: "Notice of termination".to_string(),
                        body: format!(
                            "Dear {}, your agency agreement is terminated effective {} ({}).",
                            agent.name, record.effective_date, record.reason
                        ),
                        agent_id,
                    };
                    notifications
                        .send(&notification)
                        .await
                        .map(|_| None)
                        .map_err(|e| e.to_string())
                })
                .await
            }
        }
    }

    async fn record_access(&self, agent_id: AgentId, portal: Option<bool>, commission: Option<bool>) {
        let now = self.ctx.clock.now();
        if let Err(e) = self
            .ctx
            .repositories
            .agents
            .update_access(agent_id, portal, commission, now)
            .await
        {
            warn!(agent_id = %agent_id, error = %e, "Failed to record access change on agent");
        }
    }
}

fn skip_outstanding(record: &mut TerminationRecord, by: &str, at: DateTime<Utc>) {
    for step in record.unattempted_steps() {
        record.record_step(
            step,
            &StepOutcome::Failed {
                message: format!("Skipped: process cancelled by {}", by),
                attempts: 0,
            },
            at,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::application::process_runtime::ProcessSettings;
    use crate::application::repository_factory::LifecycleRepositories;
    use crate::domain::agent::{Agent, AgentStatus};
    use crate::domain::clock::SystemClock;
    use crate::domain::process::RetryPolicy;
    use crate::domain::repository::{AgentRepository, ArchiveRepository};
    use crate::infrastructure::collaborators::Collaborators;
    use crate::infrastructure::decision_gate::DecisionGate;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::repositories::InMemoryLifecycleStore;

    fn workflow(store: Arc<InMemoryLifecycleStore>) -> TerminationWorkflow {
        TerminationWorkflow::new(ProcessContext {
            repositories: LifecycleRepositories::in_memory(store),
            collaborators: Collaborators::logging(),
            event_bus: EventBus::with_default_capacity(),
            gate: DecisionGate::new(),
            clock: Arc::new(SystemClock),
            settings: ProcessSettings {
                retry: RetryPolicy::immediate(2),
                ..ProcessSettings::default()
            },
        })
    }

    fn request(agent_id: AgentId) -> TerminateAgentRequest {
        TerminateAgentRequest {
            agent_id,
            reason: "Misrepresentation of policy terms".to_string(),
            reason_code: "MISREP".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
            initiated_by: "compliance.officer".to_string(),
        }
    }

    #[tokio::test]
    async fn test_begin_flips_agent_and_run_completes_all_steps() {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let agent = Agent::new("Theo Brandt", "theo@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();
        let workflow = workflow(store.clone());

        let record = workflow.begin(request(agent.id)).await.unwrap();
        let stored_agent = AgentRepository::get(store.as_ref(), agent.id).await.unwrap().unwrap();
        assert_eq!(stored_agent.status, AgentStatus::Terminated);
        assert_eq!(record.workflow_status, WorkflowStatus::Pending);

        let status = workflow.run(record.id, &CancelSignal::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let finished = workflow.get(record.id).await.unwrap();
        assert!(finished.outstanding_steps().is_empty());
        assert!(finished.errors.is_empty());
        assert!(finished.letter_url.is_some());
        assert_eq!(ArchiveRepository::find_by_agent(store.as_ref(), agent.id).await.unwrap().len(), 1);

        let stored_agent = AgentRepository::get(store.as_ref(), agent.id).await.unwrap().unwrap();
        assert!(!stored_agent.portal_access_enabled);
        assert!(!stored_agent.commission_enabled);
    }

    #[tokio::test]
    async fn test_begin_rejects_terminated_and_unknown_agents() {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let agent = Agent::new("Noor Haddad", "noor@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();
        let workflow = workflow(store);

        workflow.begin(request(agent.id)).await.unwrap();
        assert!(matches!(
            workflow.begin(request(agent.id)).await,
            Err(TerminationError::AlreadyTerminated(_))
        ));
        assert!(matches!(
            workflow.begin(request(AgentId::new())).await,
            Err(TerminationError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_agent_read_is_retried_within_step() {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let agent = Agent::new("Lucia Ferreira", "lucia@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();
        let workflow = workflow(store.clone());
        let record = workflow.begin(request(agent.id)).await.unwrap();

        store.fail_next_agent_reads(1);
        let status = workflow.run(record.id, &CancelSignal::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let finished = workflow.get(record.id).await.unwrap();
        assert!(finished.errors.is_empty(), "unexpected errors: {:?}", finished.errors);
        assert!(finished.flags.letter_generated);
        assert!(finished.flags.data_archived);
        assert!(finished.flags.notifications_sent);
    }

    #[tokio::test]
    async fn test_missing_agent_fails_agent_steps_after_retries() {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let agent = Agent::new("Oskar Lind", "oskar@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();
        let workflow = workflow(store.clone());
        let record = workflow.begin(request(agent.id)).await.unwrap();

        store.fail_next_agent_reads(u32::MAX);
        let status = workflow.run(record.id, &CancelSignal::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let finished = workflow.get(record.id).await.unwrap();
        assert_eq!(finished.errors.len(), 3);
        assert!(finished.errors.iter().all(|e| e.attempts == 2));
        assert!(finished.flags.portal_disabled);
        assert!(finished.flags.payouts_stopped);
    }

    #[tokio::test]
    async fn test_start_write_failure_aborts() {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let agent = Agent::new("Ivo Petrov", "ivo@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();
        let workflow = workflow(store.clone());
        let record = workflow.begin(request(agent.id)).await.unwrap();

        store.set_unavailable(true);
        let err = workflow.run(record.id, &CancelSignal::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::StartFailed { .. }));

        store.set_unavailable(false);
        assert_eq!(workflow.get(record.id).await.unwrap().workflow_status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_persisted_records_skipped_steps() {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let agent = Agent::new("Kai Moana", "kai@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();
        let workflow = workflow(store);
        let record = workflow.begin(request(agent.id)).await.unwrap();

        let cancelled = workflow.cancel_persisted(record.id, "hr.lead").await.unwrap();
        assert_eq!(cancelled.workflow_status, WorkflowStatus::Failed);
        assert_eq!(cancelled.errors.len(), TerminationStep::ALL.len());
        assert!(cancelled.errors[0].message.contains("hr.lead"));

        // A later run sees the finished record and does nothing
        let status = workflow.run(record.id, &CancelSignal::new()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);
        assert!(matches!(
            workflow.cancel_persisted(record.id, "hr.lead").await,
            Err(TerminationError::AlreadyFinished { .. })
        ));
    }
}
