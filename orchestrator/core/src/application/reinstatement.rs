// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reinstatement Workflow
//!
//! A reinstatement request waits up to the decision timeout for a human
//! decision. The store decides races: `ReinstatementRepository::resolve`
//! only succeeds on a PENDING request, so exactly one of "human approved",
//! "human rejected", "deadline passed" and "operator cancelled" is ever
//! written. Whoever wins that write runs the follow-up steps.
//!
//! # Waiting
//!
//! The process parks on four things at once:
//!
//! - the [`DecisionGate`](crate::infrastructure::decision_gate::DecisionGate)
//!   signal from a local `submit_decision`
//! - a poll of the store, for decisions written by another host
//! - the deadline, re-armed from the stored `decision_deadline` on resume
//! - its [`CancelSignal`]
//!
//! A local `submit_decision` that finds a waiter hands the follow-up work to
//! it; otherwise the submitter runs the follow-ups itself. The gate makes
//! that hand-off exact (see `DecisionGate::release`).

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::application::process_runtime::{CancelSignal, ProcessContext};
use crate::application::retry::run_step;
use crate::domain::agent::AgentId;
use crate::domain::collaborators::{Notification, NotificationKind};
use crate::domain::events::ReinstatementEvent;
use crate::domain::process::{LifecycleProcess, ProcessError, StepError, StepOutcome};
use crate::domain::reinstatement::{
    ReinstatementDecision, ReinstatementId, ReinstatementRequest, ReinstatementStatus, ReinstatementStep,
};
use crate::domain::repository::RepositoryError;

/// Agent-version conflicts tolerated while writing an approval.
const MAX_RESOLVE_CONFLICTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ReinstatementError {
    #[error("Agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("Agent {0} is not terminated")]
    NotTerminated(AgentId),

    #[error("Agent {agent_id} already has a pending reinstatement request")]
    AlreadyPending { agent_id: AgentId },

    #[error("Reinstatement request {0} not found")]
    NotFound(ReinstatementId),

    #[error("Reinstatement request {id} is already {status}")]
    AlreadyResolved {
        id: ReinstatementId,
        status: ReinstatementStatus,
    },

    #[error("Invalid reinstatement request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone)]
pub struct RequestReinstatement {
    pub agent_id: AgentId,
    pub reason: String,
    pub requested_by: String,
}

enum Wake {
    /// A local submitter signalled; the follow-ups are ours.
    Signalled(ReinstatementRequest),
    /// The poll found a decision written elsewhere.
    Observed(ReinstatementRequest),
    Deadline,
    Cancelled,
}

pub struct ReinstatementWorkflow {
    ctx: ProcessContext,
}

impl ReinstatementWorkflow {
    pub fn new(ctx: ProcessContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    /// Synchronous half of `RequestReinstatement`. A second request while one
    /// is PENDING is refused here, before any process exists.
    pub async fn request(&self, request: RequestReinstatement) -> Result<ReinstatementRequest, ReinstatementError> {
        if request.reason.trim().is_empty() {
            return Err(ReinstatementError::InvalidRequest("reason is required".to_string()));
        }

        let repos = &self.ctx.repositories;
        let agent = repos
            .agents
            .get(request.agent_id)
            .await?
            .ok_or(ReinstatementError::AgentNotFound(request.agent_id))?;
        if !agent.is_terminated() {
            return Err(ReinstatementError::NotTerminated(agent.id));
        }
        let existing = repos.reinstatements.find_by_agent(agent.id).await?;
        if existing.iter().any(|r| r.is_pending()) {
            return Err(ReinstatementError::AlreadyPending { agent_id: agent.id });
        }

        let created = ReinstatementRequest::new(
            agent.id,
            request.reason,
            request.requested_by,
            self.ctx.clock.now(),
            self.ctx.settings.decision_timeout,
        );
        match repos.reinstatements.create(&created).await {
            Ok(()) => {}
            // Lost a race with a concurrent request for the same agent
            Err(RepositoryError::Conflict(_)) => {
                return Err(ReinstatementError::AlreadyPending { agent_id: agent.id });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            request_id = %created.id,
            agent_id = %created.agent_id,
            requested_by = %created.requested_by,
            deadline = %created.decision_deadline,
            "Reinstatement requested"
        );
        self.ctx
            .event_bus
            .publish_reinstatement_event(ReinstatementEvent::ReinstatementRequested {
                request_id: created.id,
                agent_id: created.agent_id,
                requested_by: created.requested_by.clone(),
                decision_deadline: created.decision_deadline,
            });
        Ok(created)
    }

    pub async fn get(&self, id: ReinstatementId) -> Result<ReinstatementRequest, ReinstatementError> {
        self.ctx
            .repositories
            .reinstatements
            .get(id)
            .await?
            .ok_or(ReinstatementError::NotFound(id))
    }

    /// Deliver a human decision. Refused once the request is no longer
    /// PENDING; the first decision to reach the store stands.
    pub async fn submit_decision(
        &self,
        id: ReinstatementId,
        decision: ReinstatementDecision,
    ) -> Result<ReinstatementRequest, ReinstatementError> {
        if decision.approver().trim().is_empty() {
            return Err(ReinstatementError::InvalidRequest("approver is required".to_string()));
        }

        let resolved = self.resolve(id, &decision).await?;
        if self.ctx.gate.signal(id).await {
            debug!(request_id = %id, "Follow-up handed to waiting process");
            return Ok(resolved);
        }
        Ok(self.follow_up(resolved).await)
    }

    /// Cancel a request nobody on this host is waiting on.
    pub async fn cancel_persisted(&self, id: ReinstatementId, by: &str) -> Result<ReinstatementRequest, ReinstatementError> {
        let resolved = self.resolve(id, &ReinstatementDecision::cancelled(by)).await?;
        if self.ctx.gate.signal(id).await {
            return Ok(resolved);
        }
        Ok(self.follow_up(resolved).await)
    }

    pub async fn run(&self, id: ReinstatementId, cancel: &CancelSignal) -> Result<ReinstatementStatus, ProcessError> {
        let process = LifecycleProcess::Reinstatement { request_id: id };
        let repo = &self.ctx.repositories.reinstatements;
        let request = repo.get(id).await?.ok_or(ProcessError::RecordNotFound(process))?;

        match request.status {
            ReinstatementStatus::Pending => {}
            ReinstatementStatus::Approved => {
                // Approved before an earlier run could finish its follow-ups
                info!(request_id = %id, "Resuming follow-ups of approved request");
                return Ok(self.follow_up(request).await.status);
            }
            status => return Ok(status),
        }

        let first_start = request.process_started_at.is_none();
        repo.mark_process_started(id, self.ctx.clock.now())
            .await
            .map_err(|source| ProcessError::StartFailed { process, source })?;
        if first_start {
            self.notify_approver(&request).await;
        }

        let wake = self.wait_for_decision(&request, cancel).await;
        let cancelled = matches!(wake, Wake::Cancelled);
        let finished = match wake {
            Wake::Signalled(stored) => {
                self.ctx.gate.release(id).await;
                self.follow_up(stored).await
            }
            Wake::Observed(stored) => {
                if self.ctx.gate.release(id).await {
                    self.follow_up(stored).await
                } else {
                    info!(request_id = %id, status = %stored.status, "Request resolved elsewhere");
                    stored
                }
            }
            Wake::Deadline | Wake::Cancelled => {
                let decision = if cancelled {
                    ReinstatementDecision::cancelled(&cancel.requested_by())
                } else {
                    ReinstatementDecision::timeout_default(request.decision_deadline)
                };
                match self.resolve(id, &decision).await {
                    Ok(resolved) => {
                        self.ctx.gate.release(id).await;
                        self.follow_up(resolved).await
                    }
                    Err(ReinstatementError::AlreadyResolved { .. }) => {
                        let handed_over = self.ctx.gate.release(id).await;
                        let stored = repo.get(id).await?.ok_or(ProcessError::RecordNotFound(process))?;
                        if handed_over {
                            self.follow_up(stored).await
                        } else {
                            stored
                        }
                    }
                    Err(e) => {
                        self.ctx.gate.release(id).await;
                        return Err(ProcessError::Aborted {
                            process,
                            message: e.to_string(),
                        });
                    }
                }
            }
        };
        Ok(finished.status)
    }

    async fn wait_for_decision(&self, request: &ReinstatementRequest, cancel: &CancelSignal) -> Wake {
        let id = request.id;
        let notify = self.ctx.gate.register(id).await;
        let remaining = request
            .remaining_wait(self.ctx.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = tokio::time::Instant::now() + remaining;
        let poll = self.ctx.settings.poll_interval.max(Duration::from_millis(10));

        debug!(request_id = %id, remaining_secs = remaining.as_secs(), "Waiting for reinstatement decision");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Wake::Cancelled,
                _ = notify.notified() => {
                    if let Some(stored) = self.decided(id).await {
                        return Wake::Signalled(stored);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return Wake::Deadline,
                _ = tokio::time::sleep(poll) => {
                    if let Some(stored) = self.decided(id).await {
                        return Wake::Observed(stored);
                    }
                }
            }
        }
    }

    /// The stored request, if it is no longer PENDING.
    async fn decided(&self, id: ReinstatementId) -> Option<ReinstatementRequest> {
        match self.ctx.repositories.reinstatements.get(id).await {
            Ok(Some(stored)) if !stored.is_pending() => Some(stored),
            Ok(_) => None,
            Err(e) => {
                debug!(request_id = %id, error = %e, "Decision poll failed");
                None
            }
        }
    }

    /// Write a decision against a PENDING request. On approval the agent is
    /// restored in the same unit.
    async fn resolve(
        &self,
        id: ReinstatementId,
        decision: &ReinstatementDecision,
    ) -> Result<ReinstatementRequest, ReinstatementError> {
        let repos = &self.ctx.repositories;
        let policy = self.ctx.settings.retry;
        let mut conflicts = 0;
        let mut attempt = 1;

        loop {
            let current = self.get(id).await?;
            if !current.is_pending() {
                return Err(ReinstatementError::AlreadyResolved {
                    id,
                    status: current.status,
                });
            }

            let now = self.ctx.clock.now();
            let mut resolved = current.clone();
            if resolved.resolve(decision, now).is_err() {
                return Err(ReinstatementError::AlreadyResolved {
                    id,
                    status: current.status,
                });
            }

            let written = if decision.is_approval() {
                let agent = repos
                    .agents
                    .get(current.agent_id)
                    .await?
                    .ok_or(ReinstatementError::AgentNotFound(current.agent_id))?;
                let expected_version = agent.version;
                let mut restored = agent;
                restored.reinstate(now);
                repos.reinstatements.resolve(&resolved, Some((&restored, expected_version))).await
            } else {
                repos.reinstatements.resolve(&resolved, None).await
            };

            match written {
                Ok(()) => {
                    info!(
                        request_id = %id,
                        agent_id = %resolved.agent_id,
                        status = %resolved.status,
                        approver = decision.approver(),
                        system_decided = resolved.system_decided,
                        "Reinstatement request resolved"
                    );
                    metrics::counter!(
                        "lifecycle_reinstatements_resolved_total",
                        "status" => resolved.status.as_str(),
                        "system_decided" => resolved.system_decided.to_string()
                    )
                    .increment(1);
                    self.ctx
                        .event_bus
                        .publish_reinstatement_event(ReinstatementEvent::ReinstatementResolved {
                            request_id: id,
                            agent_id: resolved.agent_id,
                            status: resolved.status,
                            approver: decision.approver().to_string(),
                            system_decided: resolved.system_decided,
                            resolved_at: now,
                        });
                    return Ok(resolved);
                }
                Err(RepositoryError::InvalidState(_)) => {
                    let stored = self.get(id).await?;
                    return Err(ReinstatementError::AlreadyResolved {
                        id,
                        status: stored.status,
                    });
                }
                Err(RepositoryError::Conflict(msg)) if conflicts < MAX_RESOLVE_CONFLICTS => {
                    conflicts += 1;
                    debug!(request_id = %id, conflict = %msg, "Agent changed while resolving, retrying");
                }
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    warn!(request_id = %id, attempt, error = %e, "Resolve failed, retrying");
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Best-effort steps after the decision. Failures land in the request's
    /// error list. Returns the request as last known.
    async fn follow_up(&self, request: ReinstatementRequest) -> ReinstatementRequest {
        let id = request.id;
        let repo = &self.ctx.repositories.reinstatements;
        let mut request = request;

        match request.status {
            ReinstatementStatus::Approved => {
                let policy = self.ctx.settings.retry;
                let agent_id = request.agent_id;
                let portal = &self.ctx.collaborators.portal;
                let restored = run_step(&policy, ReinstatementStep::RestorePortal.as_str(), || async move {
                    portal.restore(agent_id).await.map(|_| None)
                })
                .await;
                if restored.is_completed() {
                    let now = self.ctx.clock.now();
                    if let Err(e) = self
                        .ctx
                        .repositories
                        .agents
                        .update_access(agent_id, Some(true), None, now)
                        .await
                    {
                        warn!(agent_id = %agent_id, error = %e, "Failed to record portal restore on agent");
                    }
                }
                self.record_outcome(&mut request, ReinstatementStep::RestorePortal, restored).await;

                let repos = &self.ctx.repositories;
                let notifications = &self.ctx.collaborators.notifications;
                let body = reinstatement_body(&request);
                let body = &body;
                let confirmation = run_step(&policy, ReinstatementStep::SendConfirmation.as_str(), || async move {
                    let agent = repos.agent_for_step(agent_id).await?;
                    let notification = Notification {
                        kind: NotificationKind::ReinstatementConfirmed,
                        recipient: agent.email,
                        subject: "Your reinstatement was approved".to_string(),
                        body: body.clone(),
                        agent_id,
                    };
                    notifications
                        .send(&notification)
                        .await
                        .map(|_| None)
                        .map_err(|e| e.to_string())
                })
                .await;
                self.record_outcome(&mut request, ReinstatementStep::SendConfirmation, confirmation)
                    .await;

                let now = self.ctx.clock.now();
                match repo.mark_completed(id, now).await {
                    Ok(()) => {
                        if let Err(e) = request.complete(now) {
                            warn!(request_id = %id, error = %e, "Stored request completed but local copy was not approved");
                        }
                        info!(request_id = %id, errors = request.errors.len(), "Reinstatement completed");
                        self.ctx
                            .event_bus
                            .publish_reinstatement_event(ReinstatementEvent::ReinstatementCompleted {
                                request_id: id,
                                agent_id,
                                error_count: request.errors.len(),
                                completed_at: now,
                            });
                    }
                    Err(e) => warn!(request_id = %id, error = %e, "Failed to mark reinstatement completed"),
                }
            }
            ReinstatementStatus::Rejected => {
                let notification = Notification {
                    kind: NotificationKind::ReinstatementRejected,
                    recipient: request.requested_by.clone(),
                    subject: "Reinstatement request rejected".to_string(),
                    body: reinstatement_body(&request),
                    agent_id: request.agent_id,
                };
                let outcome = self.notify(ReinstatementStep::NotifyRequester, &notification).await;
                self.record_outcome(&mut request, ReinstatementStep::NotifyRequester, outcome)
                    .await;
            }
            ReinstatementStatus::Pending | ReinstatementStatus::Completed => {}
        }

        match repo.get(id).await {
            Ok(Some(stored)) => stored,
            _ => request,
        }
    }

    async fn notify_approver(&self, request: &ReinstatementRequest) {
        let notification = Notification {
            kind: NotificationKind::ReinstatementApprovalNeeded,
            recipient: self.ctx.settings.approver_email.clone(),
            subject: format!("Reinstatement request {} needs a decision", request.id),
            body: format!(
                "Agent {} asks to be reinstated: {}. Requested by {}. Without a decision by {} the request is rejected automatically.",
                request.agent_id,
                request.reason,
                request.requested_by,
                request.decision_deadline.format("%Y-%m-%d %H:%M UTC")
            ),
            agent_id: request.agent_id,
        };
        let outcome = self.notify(ReinstatementStep::NotifyApprover, &notification).await;
        if let StepOutcome::Failed { message, attempts } = outcome {
            self.append_error(request.id, ReinstatementStep::NotifyApprover, message, attempts)
                .await;
        }
    }

    async fn notify(&self, step: ReinstatementStep, notification: &Notification) -> StepOutcome {
        let policy = self.ctx.settings.retry;
        let notifications = &self.ctx.collaborators.notifications;
        run_step(&policy, step.as_str(), || async move {
            notifications.send(notification).await.map(|_| None)
        })
        .await
    }

    async fn record_outcome(&self, request: &mut ReinstatementRequest, step: ReinstatementStep, outcome: StepOutcome) {
        if let StepOutcome::Failed { message, attempts } = outcome {
            let error = StepError {
                step: step.as_str().to_string(),
                message: message.clone(),
                attempts,
                recorded_at: self.ctx.clock.now(),
            };
            request.record_step_error(error);
            self.append_error(request.id, step, message, attempts).await;
        }
    }

    async fn append_error(&self, id: ReinstatementId, step: ReinstatementStep, message: String, attempts: u32) {
        let error = StepError {
            step: step.as_str().to_string(),
            message,
            attempts,
            recorded_at: self.ctx.clock.now(),
        };
        if let Err(e) = self.ctx.repositories.reinstatements.append_error(id, &error).await {
            warn!(request_id = %id, step = %step, error = %e, "Failed to record step error");
        }
    }
}

fn reinstatement_body(request: &ReinstatementRequest) -> String {
    match request.status {
        ReinstatementStatus::Rejected => format!(
            "The reinstatement request for agent {} was rejected by {}: {}",
            request.agent_id,
            request.approver.as_deref().unwrap_or("unknown"),
            request.rejection_reason.as_deref().unwrap_or("no reason given")
        ),
        _ => {
            let mut body = format!(
                "Your agency appointment has been reinstated (approved by {}).",
                request.approver.as_deref().unwrap_or("unknown")
            );
            if let Some(conditions) = &request.conditions {
                body.push_str(&format!(" Conditions: {}.", conditions));
            }
            if let Some(days) = request.probation_days {
                body.push_str(&format!(" Probation period: {} days.", days));
            }
            body
        }
    }
}
