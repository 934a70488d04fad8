// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Expiry sweep run state and its batch operation log.

use std::collections::BTreeSet;

use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::license::LicenseId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRunId(pub Uuid);

impl BatchRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `Scanning → Batching → {DryRunDone | Committing → Done}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SweepPhase {
    Scanning,
    Batching,
    DryRunDone,
    Committing,
    Done,
}

impl SweepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepPhase::Scanning => "SCANNING",
            SweepPhase::Batching => "BATCHING",
            SweepPhase::DryRunDone => "DRY_RUN_DONE",
            SweepPhase::Committing => "COMMITTING",
            SweepPhase::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCANNING" => Some(SweepPhase::Scanning),
            "BATCHING" => Some(SweepPhase::Batching),
            "DRY_RUN_DONE" => Some(SweepPhase::DryRunDone),
            "COMMITTING" => Some(SweepPhase::Committing),
            "DONE" => Some(SweepPhase::Done),
            _ => None,
        }
    }

    fn can_advance_to(&self, next: SweepPhase) -> bool {
        matches!(
            (self, next),
            (SweepPhase::Scanning, SweepPhase::Batching)
                | (SweepPhase::Batching, SweepPhase::DryRunDone)
                | (SweepPhase::Batching, SweepPhase::Committing)
                | (SweepPhase::Committing, SweepPhase::Done)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Sweep cannot move from {from:?} to {to:?}")]
pub struct PhaseError {
    pub from: SweepPhase,
    pub to: SweepPhase,
}

/// One sweep's scope and outcome. Built up while the run progresses and
/// written once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperationLog {
    pub id: BatchRunId,
    pub run_date: NaiveDate,
    pub phase: SweepPhase,
    pub dry_run: bool,
    pub chunk_size: usize,
    pub chunks: usize,
    pub total_found: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<LicenseId>,
    pub affected_license_ids: Vec<LicenseId>,
    pub affected_agent_ids: BTreeSet<AgentId>,
    /// Agents left ACTIVE because their deactivation failed. The next
    /// committed run retries them.
    #[serde(default)]
    pub failed_agent_ids: BTreeSet<AgentId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchOperationLog {
    pub fn start(run_date: NaiveDate, dry_run: bool, chunk_size: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            id: BatchRunId::new(),
            run_date,
            phase: SweepPhase::Scanning,
            dry_run,
            chunk_size,
            chunks: 0,
            total_found: 0,
            succeeded: 0,
            failed: 0,
            failed_ids: Vec::new(),
            affected_license_ids: Vec::new(),
            affected_agent_ids: BTreeSet::new(),
            failed_agent_ids: BTreeSet::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn advance(&mut self, next: SweepPhase) -> Result<(), PhaseError> {
        if !self.phase.can_advance_to(next) {
            return Err(PhaseError { from: self.phase, to: next });
        }
        self.phase = next;
        Ok(())
    }

    pub fn record_success(&mut self, license_id: LicenseId, agent_id: AgentId) {
        self.succeeded += 1;
        self.affected_license_ids.push(license_id);
        self.affected_agent_ids.insert(agent_id);
    }

    pub fn record_failure(&mut self, license_id: LicenseId) {
        self.failed += 1;
        self.failed_ids.push(license_id);
    }

    pub fn record_agent_failure(&mut self, agent_id: AgentId) {
        self.failed_agent_ids.insert(agent_id);
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    /// Every license found is either succeeded or listed as failed.
    pub fn is_accounted(&self) -> bool {
        self.dry_run || self.succeeded + self.failed == self.total_found
    }

    /// No license and no agent was left unprocessed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.failed_agent_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(dry_run: bool) -> BatchOperationLog {
        BatchOperationLog::start(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(), dry_run, 100, Utc::now())
    }

    #[test]
    fn test_commit_path() {
        let mut log = log(false);
        log.advance(SweepPhase::Batching).unwrap();
        log.advance(SweepPhase::Committing).unwrap();
        log.advance(SweepPhase::Done).unwrap();
        assert_eq!(log.phase, SweepPhase::Done);
    }

    #[test]
    fn test_dry_run_cannot_commit_after_done() {
        let mut log = log(true);
        log.advance(SweepPhase::Batching).unwrap();
        log.advance(SweepPhase::DryRunDone).unwrap();
        assert_eq!(
            log.advance(SweepPhase::Committing),
            Err(PhaseError { from: SweepPhase::DryRunDone, to: SweepPhase::Committing })
        );
    }

    #[test]
    fn test_agents_are_deduplicated() {
        let mut log = log(false);
        let agent = AgentId::new();
        log.total_found = 3;
        log.record_success(LicenseId::new(), agent);
        log.record_success(LicenseId::new(), agent);
        log.record_failure(LicenseId::new());
        assert_eq!(log.affected_agent_ids.len(), 1);
        assert!(log.is_accounted());
    }

    #[test]
    fn test_agent_failure_makes_run_unclean() {
        let mut log = log(false);
        let agent = AgentId::new();
        log.total_found = 1;
        log.record_success(LicenseId::new(), agent);
        assert!(log.is_clean());

        log.record_agent_failure(agent);
        assert!(log.is_accounted());
        assert!(!log.is_clean());
        assert_eq!(log.failed_agent_ids.iter().copied().collect::<Vec<_>>(), vec![agent]);
    }

    #[test]
    fn test_log_without_failed_agents_field_deserializes() {
        let mut value = serde_json::to_value(log(false)).unwrap();
        value.as_object_mut().unwrap().remove("failed_agent_ids");
        let parsed: BatchOperationLog = serde_json::from_value(value).unwrap();
        assert!(parsed.failed_agent_ids.is_empty());
    }
}
