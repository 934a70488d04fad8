// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::batch::{BatchRunId, SweepPhase};
use crate::domain::license::{LicenseId, LicenseStatus};
use crate::domain::reinstatement::{ReinstatementId, ReinstatementStatus};
use crate::domain::termination::{TerminationId, WorkflowStatus};

/// License store events. Emitted after the transition is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LicenseEvent {
    LicenseTransitioned {
        license_id: LicenseId,
        agent_id: AgentId,
        action: String,
        from: LicenseStatus,
        to: LicenseStatus,
        actor: String,
        transitioned_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SweepEvent {
    SweepCompleted {
        run_id: BatchRunId,
        phase: SweepPhase,
        dry_run: bool,
        total_found: usize,
        succeeded: usize,
        failed: usize,
        deactivated_agents: usize,
        completed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TerminationEvent {
    TerminationStarted {
        termination_id: TerminationId,
        agent_id: AgentId,
        reason_code: String,
        started_at: DateTime<Utc>,
    },
    TerminationStepRecorded {
        termination_id: TerminationId,
        agent_id: AgentId,
        step: String,
        succeeded: bool,
        recorded_at: DateTime<Utc>,
    },
    TerminationFinished {
        termination_id: TerminationId,
        agent_id: AgentId,
        status: WorkflowStatus,
        error_count: usize,
        finished_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReinstatementEvent {
    ReinstatementRequested {
        request_id: ReinstatementId,
        agent_id: AgentId,
        requested_by: String,
        decision_deadline: DateTime<Utc>,
    },
    ReinstatementResolved {
        request_id: ReinstatementId,
        agent_id: AgentId,
        status: ReinstatementStatus,
        approver: String,
        system_decided: bool,
        resolved_at: DateTime<Utc>,
    },
    ReinstatementCompleted {
        request_id: ReinstatementId,
        agent_id: AgentId,
        error_count: usize,
        completed_at: DateTime<Utc>,
    },
}
