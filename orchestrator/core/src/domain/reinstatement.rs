// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reinstatement request aggregate.
//!
//! A request is created PENDING and resolved exactly once, either by a human
//! decision or by the decision deadline passing (which rejects on the
//! system's behalf). `resolve` is the only way out of PENDING and refuses to
//! run twice.

use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::process::StepError;

pub const DEFAULT_DECISION_TIMEOUT_DAYS: i64 = 30;
pub const SYSTEM_APPROVER: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReinstatementId(pub Uuid);

impl ReinstatementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ReinstatementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReinstatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReinstatementStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ReinstatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReinstatementStatus::Pending => "PENDING",
            ReinstatementStatus::Approved => "APPROVED",
            ReinstatementStatus::Rejected => "REJECTED",
            ReinstatementStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ReinstatementStatus::Pending),
            "APPROVED" => Some(ReinstatementStatus::Approved),
            "REJECTED" => Some(ReinstatementStatus::Rejected),
            "COMPLETED" => Some(ReinstatementStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReinstatementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signal that resolves a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReinstatementDecision {
    Approve {
        approver: String,
        conditions: Option<String>,
        probation_days: Option<u32>,
    },
    Reject {
        approver: String,
        reason: String,
    },
}

impl ReinstatementDecision {
    pub fn approver(&self) -> &str {
        match self {
            ReinstatementDecision::Approve { approver, .. } => approver,
            ReinstatementDecision::Reject { approver, .. } => approver,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, ReinstatementDecision::Approve { .. })
    }

    /// Default outcome when nobody decided before the deadline.
    pub fn timeout_default(deadline: DateTime<Utc>) -> Self {
        ReinstatementDecision::Reject {
            approver: SYSTEM_APPROVER.to_string(),
            reason: format!(
                "No decision received before the deadline ({}); rejected automatically",
                deadline.format("%Y-%m-%d %H:%M UTC")
            ),
        }
    }

    pub fn cancelled(by: &str) -> Self {
        ReinstatementDecision::Reject {
            approver: SYSTEM_APPROVER.to_string(),
            reason: format!("Reinstatement process cancelled by operator {}", by),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinstatementStep {
    NotifyApprover,
    RestorePortal,
    SendConfirmation,
    NotifyRequester,
}

impl ReinstatementStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReinstatementStep::NotifyApprover => "notify_approver",
            ReinstatementStep::RestorePortal => "restore_portal",
            ReinstatementStep::SendConfirmation => "send_confirmation",
            ReinstatementStep::NotifyRequester => "notify_requester",
        }
    }
}

impl std::fmt::Display for ReinstatementStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReinstatementStateError {
    #[error("Reinstatement request is already {0}")]
    AlreadyResolved(ReinstatementStatus),

    #[error("Reinstatement request must be APPROVED to complete (is {0})")]
    NotApproved(ReinstatementStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinstatementRequest {
    pub id: ReinstatementId,
    pub agent_id: AgentId,
    pub reason: String,
    pub requested_by: String,
    pub status: ReinstatementStatus,
    pub approver: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub conditions: Option<String>,
    pub probation_days: Option<u32>,
    pub rejection_reason: Option<String>,
    /// True when the deadline, not a person, produced the decision.
    pub system_decided: bool,
    pub decision_deadline: DateTime<Utc>,
    pub process_started_at: Option<DateTime<Utc>>,
    pub errors: Vec<StepError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReinstatementRequest {
    pub fn new(
        agent_id: AgentId,
        reason: impl Into<String>,
        requested_by: impl Into<String>,
        created_at: DateTime<Utc>,
        decision_timeout: Duration,
    ) -> Self {
        Self {
            id: ReinstatementId::new(),
            agent_id,
            reason: reason.into(),
            requested_by: requested_by.into(),
            status: ReinstatementStatus::Pending,
            approver: None,
            decided_at: None,
            conditions: None,
            probation_days: None,
            rejection_reason: None,
            system_decided: false,
            decision_deadline: created_at + decision_timeout,
            process_started_at: None,
            errors: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReinstatementStatus::Pending
    }

    /// Time left before the deadline fires, zero if already past.
    pub fn remaining_wait(&self, now: DateTime<Utc>) -> Duration {
        let left = self.decision_deadline - now;
        if left < Duration::zero() {
            Duration::zero()
        } else {
            left
        }
    }

    pub fn resolve(
        &mut self,
        decision: &ReinstatementDecision,
        at: DateTime<Utc>,
    ) -> Result<(), ReinstatementStateError> {
        if !self.is_pending() {
            return Err(ReinstatementStateError::AlreadyResolved(self.status));
        }
        match decision {
            ReinstatementDecision::Approve { approver, conditions, probation_days } => {
                self.status = ReinstatementStatus::Approved;
                self.approver = Some(approver.clone());
                self.conditions = conditions.clone();
                self.probation_days = *probation_days;
            }
            ReinstatementDecision::Reject { approver, reason } => {
                self.status = ReinstatementStatus::Rejected;
                self.approver = Some(approver.clone());
                self.rejection_reason = Some(reason.clone());
            }
        }
        self.system_decided = decision.approver() == SYSTEM_APPROVER;
        self.decided_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), ReinstatementStateError> {
        if self.status != ReinstatementStatus::Approved {
            return Err(ReinstatementStateError::NotApproved(self.status));
        }
        self.status = ReinstatementStatus::Completed;
        self.updated_at = at;
        Ok(())
    }

    pub fn record_step_error(&mut self, error: StepError) {
        self.updated_at = error.recorded_at;
        self.errors.push(error);
    }

    /// The decision this request was resolved with, if any.
    pub fn decision(&self) -> Option<ReinstatementDecision> {
        let approver = self.approver.clone()?;
        match self.status {
            ReinstatementStatus::Pending => None,
            ReinstatementStatus::Approved | ReinstatementStatus::Completed => {
                Some(ReinstatementDecision::Approve {
                    approver,
                    conditions: self.conditions.clone(),
                    probation_days: self.probation_days,
                })
            }
            ReinstatementStatus::Rejected => Some(ReinstatementDecision::Reject {
                approver,
                reason: self.rejection_reason.clone().unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ReinstatementRequest {
        ReinstatementRequest::new(
            AgentId::new(),
            "Appeal upheld by regional office",
            "agent.self",
            Utc::now(),
            Duration::days(DEFAULT_DECISION_TIMEOUT_DAYS),
        )
    }

    #[test]
    fn test_resolve_is_terminal() {
        let mut request = request();
        let approve = ReinstatementDecision::Approve {
            approver: "regional.manager".to_string(),
            conditions: Some("Quarterly compliance review".to_string()),
            probation_days: Some(90),
        };
        request.resolve(&approve, Utc::now()).unwrap();
        assert_eq!(request.status, ReinstatementStatus::Approved);
        assert_eq!(request.probation_days, Some(90));
        assert!(!request.system_decided);

        let reject = ReinstatementDecision::Reject {
            approver: "other".to_string(),
            reason: "late".to_string(),
        };
        assert_eq!(
            request.resolve(&reject, Utc::now()),
            Err(ReinstatementStateError::AlreadyResolved(ReinstatementStatus::Approved))
        );
        assert_eq!(request.decision(), Some(approve));
    }

    #[test]
    fn test_timeout_default_is_system_rejection() {
        let mut request = request();
        let decision = ReinstatementDecision::timeout_default(request.decision_deadline);
        request.resolve(&decision, request.decision_deadline).unwrap();
        assert_eq!(request.status, ReinstatementStatus::Rejected);
        assert!(request.system_decided);
        assert_eq!(request.approver.as_deref(), Some(SYSTEM_APPROVER));
        assert!(request.rejection_reason.unwrap().contains("rejected automatically"));
    }

    #[test]
    fn test_complete_requires_approval() {
        let mut request = request();
        assert_eq!(
            request.complete(Utc::now()),
            Err(ReinstatementStateError::NotApproved(ReinstatementStatus::Pending))
        );
    }

    #[test]
    fn test_remaining_wait_never_negative() {
        let request = request();
        assert_eq!(request.remaining_wait(request.decision_deadline + Duration::days(1)), Duration::zero());
        assert_eq!(request.remaining_wait(request.created_at), Duration::days(30));
    }
}
