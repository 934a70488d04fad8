// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Termination record: the persisted progress of one termination process.
//!
//! The record is created in the same unit as the agent's flip to TERMINATED,
//! so `status_updated` starts out true. Each remaining step sets its own flag
//! (or appends to `errors`) as soon as it runs; a restarted process reads the
//! flags and only runs what is still outstanding.

use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::process::{StepError, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminationId(pub Uuid);

impl TerminationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TerminationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TerminationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::InProgress => "IN_PROGRESS",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(WorkflowStatus::Pending),
            "IN_PROGRESS" => Some(WorkflowStatus::InProgress),
            "COMPLETED" => Some(WorkflowStatus::Completed),
            "FAILED" => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-effecting steps run after the synchronous status flip, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStep {
    DisablePortal,
    StopPayouts,
    GenerateLetter,
    ArchiveData,
    SendNotifications,
}

impl TerminationStep {
    pub const ALL: [TerminationStep; 5] = [
        TerminationStep::DisablePortal,
        TerminationStep::StopPayouts,
        TerminationStep::GenerateLetter,
        TerminationStep::ArchiveData,
        TerminationStep::SendNotifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationStep::DisablePortal => "disable_portal",
            TerminationStep::StopPayouts => "stop_payouts",
            TerminationStep::GenerateLetter => "generate_letter",
            TerminationStep::ArchiveData => "archive_data",
            TerminationStep::SendNotifications => "send_notifications",
        }
    }
}

impl std::fmt::Display for TerminationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationFlags {
    pub status_updated: bool,
    pub portal_disabled: bool,
    pub payouts_stopped: bool,
    pub letter_generated: bool,
    pub data_archived: bool,
    pub notifications_sent: bool,
}

impl TerminationFlags {
    pub fn is_set(&self, step: TerminationStep) -> bool {
        match step {
            TerminationStep::DisablePortal => self.portal_disabled,
            TerminationStep::StopPayouts => self.payouts_stopped,
            TerminationStep::GenerateLetter => self.letter_generated,
            TerminationStep::ArchiveData => self.data_archived,
            TerminationStep::SendNotifications => self.notifications_sent,
        }
    }

    fn set(&mut self, step: TerminationStep) {
        match step {
            TerminationStep::DisablePortal => self.portal_disabled = true,
            TerminationStep::StopPayouts => self.payouts_stopped = true,
            TerminationStep::GenerateLetter => self.letter_generated = true,
            TerminationStep::ArchiveData => self.data_archived = true,
            TerminationStep::SendNotifications => self.notifications_sent = true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationRecord {
    pub id: TerminationId,
    pub agent_id: AgentId,
    pub reason: String,
    pub reason_code: String,
    pub effective_date: NaiveDate,
    pub initiated_by: String,
    pub flags: TerminationFlags,
    pub letter_url: Option<String>,
    pub workflow_status: WorkflowStatus,
    pub errors: Vec<StepError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TerminationRecord {
    pub fn new(
        agent_id: AgentId,
        reason: impl Into<String>,
        reason_code: impl Into<String>,
        effective_date: NaiveDate,
        initiated_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TerminationId::new(),
            agent_id,
            reason: reason.into(),
            reason_code: reason_code.into(),
            effective_date,
            initiated_by: initiated_by.into(),
            flags: TerminationFlags {
                status_updated: true,
                ..TerminationFlags::default()
            },
            letter_url: None,
            workflow_status: WorkflowStatus::Pending,
            errors: Vec::new(),
            created_at,
            updated_at: created_at,
            completed_at: None,
        }
    }

    /// Steps whose flag is not set yet, in execution order.
    pub fn outstanding_steps(&self) -> Vec<TerminationStep> {
        TerminationStep::ALL
            .into_iter()
            .filter(|s| !self.flags.is_set(*s))
            .collect()
    }

    /// Outstanding steps that have not failed yet either. A resumed process
    /// runs only these; failures stay recorded rather than retried.
    pub fn unattempted_steps(&self) -> Vec<TerminationStep> {
        self.outstanding_steps()
            .into_iter()
            .filter(|s| !self.errors.iter().any(|e| e.step == s.as_str()))
            .collect()
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        if self.workflow_status == WorkflowStatus::Pending {
            self.workflow_status = WorkflowStatus::InProgress;
        }
        self.updated_at = at;
    }

    pub fn record_step(&mut self, step: TerminationStep, outcome: &StepOutcome, at: DateTime<Utc>) {
        match outcome {
            StepOutcome::Completed { detail } => {
                self.flags.set(step);
                if step == TerminationStep::GenerateLetter {
                    self.letter_url = detail.clone();
                }
            }
            StepOutcome::Failed { message, attempts } => {
                self.errors.push(StepError {
                    step: step.as_str().to_string(),
                    message: message.clone(),
                    attempts: *attempts,
                    recorded_at: at,
                });
            }
        }
        self.updated_at = at;
    }

    /// Close the record. `Completed` is used even when individual steps
    /// failed; the error list carries those.
    pub fn finish(&mut self, status: WorkflowStatus, at: DateTime<Utc>) {
        self.workflow_status = status;
        self.completed_at = Some(at);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TerminationRecord {
        TerminationRecord::new(
            AgentId::new(),
            "Fraudulent policy submissions",
            "FRAUD",
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            "hr.admin",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_record_has_status_flag_only() {
        let record = record();
        assert!(record.flags.status_updated);
        assert_eq!(record.workflow_status, WorkflowStatus::Pending);
        assert_eq!(record.outstanding_steps(), TerminationStep::ALL.to_vec());
    }

    #[test]
    fn test_record_step_sets_flag_or_error() {
        let mut record = record();
        let now = Utc::now();
        record.record_step(
            TerminationStep::GenerateLetter,
            &StepOutcome::Completed { detail: Some("https://docs/letter.pdf".to_string()) },
            now,
        );
        record.record_step(
            TerminationStep::DisablePortal,
            &StepOutcome::Failed { message: "portal down".to_string(), attempts: 3 },
            now,
        );

        assert!(record.flags.letter_generated);
        assert_eq!(record.letter_url.as_deref(), Some("https://docs/letter.pdf"));
        assert!(!record.flags.portal_disabled);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].step, "disable_portal");
        assert_eq!(
            record.outstanding_steps(),
            vec![
                TerminationStep::DisablePortal,
                TerminationStep::StopPayouts,
                TerminationStep::ArchiveData,
                TerminationStep::SendNotifications,
            ]
        );
        assert_eq!(
            record.unattempted_steps(),
            vec![
                TerminationStep::StopPayouts,
                TerminationStep::ArchiveData,
                TerminationStep::SendNotifications,
            ]
        );
    }
}
