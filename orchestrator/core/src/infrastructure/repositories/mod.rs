// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresLicenseRepository** - licenses, audit trail, bulk expiry
//! - **PostgresLifecycleRepository** - agents, termination records,
//!   reinstatement requests, archives
//! - **PostgresBatchLogRepository** - sweep run logs
//!
//! ## In-Memory Store
//!
//! **InMemoryLifecycleStore** implements every trait over one set of maps
//! behind a single lock, so cross-aggregate units (bulk expiry, termination
//! start, reinstatement approval) are atomic the same way a transaction is.
//! It also counts mutations and can inject faults, which the tests use.

pub mod postgres_batch_log;
pub mod postgres_license;
pub mod postgres_lifecycle;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::archive::DataArchive;
use crate::domain::batch::{BatchOperationLog, BatchRunId};
use crate::domain::license::{AuditEntry, AuditEntryId, License, LicenseId, LicenseStatus};
use crate::domain::license_rules::Transition;
use crate::domain::process::StepError;
use crate::domain::reinstatement::{ReinstatementId, ReinstatementRequest, ReinstatementStatus};
use crate::domain::repository::{
    AgentRepository, ArchiveRepository, BatchLogRepository, ExpiryBatchOutcome, LicenseRepository,
    ReinstatementRepository, RepositoryError, TerminationRepository,
};
use crate::domain::termination::{TerminationId, TerminationRecord};

pub use postgres_batch_log::PostgresBatchLogRepository;
pub use postgres_license::PostgresLicenseRepository;
pub use postgres_lifecycle::PostgresLifecycleRepository;

#[derive(Default)]
struct StoreState {
    agents: HashMap<AgentId, Agent>,
    licenses: HashMap<LicenseId, License>,
    audit: Vec<AuditEntry>,
    terminations: HashMap<TerminationId, TerminationRecord>,
    reinstatements: HashMap<ReinstatementId, ReinstatementRequest>,
    archives: Vec<DataArchive>,
    batch_logs: Vec<BatchOperationLog>,
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    fail_bulk_expiry: bool,
    failing_licenses: HashSet<LicenseId>,
    failing_agents: HashSet<AgentId>,
    agent_read_failures: u32,
}

#[derive(Default)]
pub struct InMemoryLifecycleStore {
    state: RwLock<StoreState>,
    faults: Mutex<Faults>,
    license_mutations: AtomicU64,
    reinstatement_resolutions: AtomicU64,
}

impl InMemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls that reached a mutation path of the license store.
    pub fn license_mutation_count(&self) -> u64 {
        self.license_mutations.load(Ordering::SeqCst)
    }

    /// Successful PENDING → APPROVED/REJECTED writes.
    pub fn reinstatement_resolution_count(&self) -> u64 {
        self.reinstatement_resolutions.load(Ordering::SeqCst)
    }

    /// Every write fails with a database error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    /// Bulk expiry fails as a whole while set; per-item writes still work.
    pub fn fail_bulk_expiry(&self, fail: bool) {
        self.faults.lock().fail_bulk_expiry = fail;
    }

    /// Any write touching this license fails.
    pub fn fail_license(&self, id: LicenseId) {
        self.faults.lock().failing_licenses.insert(id);
    }

    /// `deactivate_if_unlicensed` fails for this agent while set.
    pub fn fail_agent_deactivation(&self, id: AgentId, fail: bool) {
        let mut faults = self.faults.lock();
        if fail {
            faults.failing_agents.insert(id);
        } else {
            faults.failing_agents.remove(&id);
        }
    }

    /// The next `count` agent reads fail with a database error.
    pub fn fail_next_agent_reads(&self, count: u32) {
        self.faults.lock().agent_read_failures = count;
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.faults.lock().unavailable {
            return Err(RepositoryError::Database("store unavailable".to_string()));
        }
        Ok(())
    }

    fn check_license_writable(&self, id: LicenseId) -> Result<(), RepositoryError> {
        self.check_available()?;
        if self.faults.lock().failing_licenses.contains(&id) {
            return Err(RepositoryError::Database(format!("write to license {} failed", id)));
        }
        Ok(())
    }
}

fn holds_license_in_force(state: &StoreState, agent_id: AgentId) -> bool {
    state
        .licenses
        .values()
        .any(|l| l.agent_id == agent_id && !l.deleted && l.status().is_in_force())
}

fn deactivate_locked(state: &mut StoreState, agent_id: AgentId, at: DateTime<Utc>) -> bool {
    if holds_license_in_force(state, agent_id) {
        return false;
    }
    match state.agents.get_mut(&agent_id) {
        Some(agent) if agent.status == AgentStatus::Active => {
            agent.deactivate(at);
            true
        }
        _ => false,
    }
}

fn verify_transition(state: &StoreState, transition: &Transition) -> Result<(), RepositoryError> {
    let license = state
        .licenses
        .get(&transition.license_id)
        .filter(|l| !l.deleted)
        .ok_or_else(|| RepositoryError::NotFound(format!("License {}", transition.license_id)))?;

    if license.version != transition.expected_version {
        return Err(RepositoryError::Conflict(format!(
            "License {} is at version {}, transition computed against {}",
            license.id, license.version, transition.expected_version
        )));
    }
    Ok(())
}

fn apply_locked(
    state: &mut StoreState,
    transition: &Transition,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<License, RepositoryError> {
    verify_transition(state, transition)?;

    let license = state
        .licenses
        .get_mut(&transition.license_id)
        .ok_or_else(|| RepositoryError::NotFound(format!("License {}", transition.license_id)))?;
    license.state = transition.new_state.clone();
    license.version += 1;
    license.updated_at = at;
    let updated = license.clone();

    state.audit.push(AuditEntry {
        id: AuditEntryId::new(),
        license_id: transition.license_id,
        action: transition.action.clone(),
        old_state: transition.old_state.clone(),
        new_state: transition.new_state.clone(),
        actor: actor.to_string(),
        reason: transition.reason.clone(),
        recorded_at: at,
    });

    Ok(updated)
}

#[async_trait]
impl LicenseRepository for InMemoryLifecycleStore {
    async fn insert(&self, license: &License) -> Result<(), RepositoryError> {
        self.license_mutations.fetch_add(1, Ordering::SeqCst);
        self.check_license_writable(license.id)?;

        let mut state = self.state.write();
        let live = || state.licenses.values().filter(|l| !l.deleted);
        if live().any(|l| l.license_number == license.license_number) {
            return Err(RepositoryError::Conflict(format!(
                "License number {} already exists",
                license.license_number
            )));
        }
        if license.is_primary && live().any(|l| l.agent_id == license.agent_id && l.is_primary) {
            return Err(RepositoryError::Conflict(format!(
                "Agent {} already has a primary license",
                license.agent_id
            )));
        }
        state.licenses.insert(license.id, license.clone());
        Ok(())
    }

    async fn get(&self, id: LicenseId) -> Result<Option<License>, RepositoryError> {
        Ok(self.state.read().licenses.get(&id).filter(|l| !l.deleted).cloned())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<License>, RepositoryError> {
        let state = self.state.read();
        let mut licenses: Vec<License> = state
            .licenses
            .values()
            .filter(|l| l.agent_id == agent_id && !l.deleted)
            .cloned()
            .collect();
        licenses.sort_by_key(|l| (l.issue_date, l.license_number.clone()));
        Ok(licenses)
    }

    async fn find_by_status(&self, status: LicenseStatus) -> Result<Vec<License>, RepositoryError> {
        let state = self.state.read();
        let mut licenses: Vec<License> = state
            .licenses
            .values()
            .filter(|l| l.status() == status && !l.deleted)
            .cloned()
            .collect();
        licenses.sort_by_key(|l| (l.renewal_date(), l.id));
        Ok(licenses)
    }

    async fn apply_transition(
        &self,
        transition: &Transition,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<License, RepositoryError> {
        self.license_mutations.fetch_add(1, Ordering::SeqCst);
        self.check_license_writable(transition.license_id)?;

        let mut state = self.state.write();
        apply_locked(&mut state, transition, actor, at)
    }

    async fn expire_batch(
        &self,
        transitions: &[Transition],
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<ExpiryBatchOutcome, RepositoryError> {
        self.license_mutations.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.faults.lock().fail_bulk_expiry {
            return Err(RepositoryError::Database("bulk expiry failed".to_string()));
        }
        for transition in transitions {
            self.check_license_writable(transition.license_id)?;
        }

        let mut state = self.state.write();
        // Validate everything before touching anything: all or nothing
        for transition in transitions {
            verify_transition(&state, transition)?;
        }

        let mut outcome = ExpiryBatchOutcome::default();
        let mut agents = BTreeSet::new();
        for transition in transitions {
            let license = apply_locked(&mut state, transition, actor, at)?;
            agents.insert(license.agent_id);
            outcome.expired.push(license);
        }
        for agent_id in agents {
            if deactivate_locked(&mut state, agent_id, at) {
                outcome.deactivated_agents.push(agent_id);
            }
        }
        Ok(outcome)
    }

    async fn audit_trail(&self, id: LicenseId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let state = self.state.read();
        Ok(state.audit.iter().filter(|e| e.license_id == id).cloned().collect())
    }
}

#[async_trait]
impl AgentRepository for InMemoryLifecycleStore {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.check_available()?;
        self.state.write().agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        {
            let mut faults = self.faults.lock();
            if faults.agent_read_failures > 0 {
                faults.agent_read_failures -= 1;
                return Err(RepositoryError::Database(format!("read of agent {} failed", id)));
            }
        }
        Ok(self.state.read().agents.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self.state.read().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn deactivate_if_unlicensed(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.license_mutations.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.faults.lock().failing_agents.contains(&id) {
            return Err(RepositoryError::Database(format!("write to agent {} failed", id)));
        }
        Ok(deactivate_locked(&mut self.state.write(), id, at))
    }

    async fn update_access(
        &self,
        id: AgentId,
        portal_access: Option<bool>,
        commission: Option<bool>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        let agent = state
            .agents
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Agent {}", id)))?;
        if let Some(enabled) = portal_access {
            agent.portal_access_enabled = enabled;
        }
        if let Some(enabled) = commission {
            agent.commission_enabled = enabled;
        }
        agent.version += 1;
        agent.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl TerminationRepository for InMemoryLifecycleStore {
    async fn begin(
        &self,
        record: &TerminationRecord,
        agent: &Agent,
        expected_agent_version: u64,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        let stored = state
            .agents
            .get(&agent.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Agent {}", agent.id)))?;
        if stored.version != expected_agent_version {
            return Err(RepositoryError::Conflict(format!(
                "Agent {} changed concurrently (version {} != {})",
                agent.id, stored.version, expected_agent_version
            )));
        }
        state.agents.insert(agent.id, agent.clone());
        state.terminations.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: TerminationId) -> Result<Option<TerminationRecord>, RepositoryError> {
        Ok(self.state.read().terminations.get(&id).cloned())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<TerminationRecord>, RepositoryError> {
        let state = self.state.read();
        let mut records: Vec<TerminationRecord> = state
            .terminations
            .values()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_unfinished(&self) -> Result<Vec<TerminationRecord>, RepositoryError> {
        let state = self.state.read();
        let mut records: Vec<TerminationRecord> = state
            .terminations
            .values()
            .filter(|r| !r.workflow_status.is_finished())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn save_progress(&self, record: &TerminationRecord) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        let stored = state
            .terminations
            .get_mut(&record.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Termination {}", record.id)))?;
        if stored.workflow_status.is_finished() {
            return Err(RepositoryError::InvalidState(format!(
                "Termination {} is already finished",
                record.id
            )));
        }
        stored.flags = record.flags.clone();
        stored.letter_url = record.letter_url.clone();
        stored.workflow_status = record.workflow_status;
        stored.errors = record.errors.clone();
        stored.updated_at = record.updated_at;
        stored.completed_at = record.completed_at;
        Ok(())
    }
}

#[async_trait]
impl ReinstatementRepository for InMemoryLifecycleStore {
    async fn create(&self, request: &ReinstatementRequest) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        if state
            .reinstatements
            .values()
            .any(|r| r.agent_id == request.agent_id && r.is_pending())
        {
            return Err(RepositoryError::Conflict(format!(
                "Agent {} already has a pending reinstatement request",
                request.agent_id
            )));
        }
        state.reinstatements.insert(request.id, request.clone());
        Ok(())
    }

    async fn get(&self, id: ReinstatementId) -> Result<Option<ReinstatementRequest>, RepositoryError> {
        Ok(self.state.read().reinstatements.get(&id).cloned())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<ReinstatementRequest>, RepositoryError> {
        let state = self.state.read();
        let mut requests: Vec<ReinstatementRequest> = state
            .reinstatements
            .values()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn find_by_status(
        &self,
        status: ReinstatementStatus,
    ) -> Result<Vec<ReinstatementRequest>, RepositoryError> {
        let state = self.state.read();
        let mut requests: Vec<ReinstatementRequest> = state
            .reinstatements
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn mark_process_started(
        &self,
        id: ReinstatementId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        let stored = state
            .reinstatements
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Reinstatement {}", id)))?;
        if stored.process_started_at.is_none() {
            stored.process_started_at = Some(at);
        }
        Ok(())
    }

    async fn resolve(
        &self,
        request: &ReinstatementRequest,
        agent: Option<(&Agent, u64)>,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();

        let stored_status = state
            .reinstatements
            .get(&request.id)
            .map(|r| r.status)
            .ok_or_else(|| RepositoryError::NotFound(format!("Reinstatement {}", request.id)))?;
        if stored_status != ReinstatementStatus::Pending {
            return Err(RepositoryError::InvalidState(format!(
                "Reinstatement {} is already {}",
                request.id, stored_status
            )));
        }

        if let Some((agent, expected_version)) = agent {
            let current = state
                .agents
                .get(&agent.id)
                .map(|a| a.version)
                .ok_or_else(|| RepositoryError::NotFound(format!("Agent {}", agent.id)))?;
            if current != expected_version {
                return Err(RepositoryError::Conflict(format!(
                    "Agent {} changed concurrently (version {} != {})",
                    agent.id, current, expected_version
                )));
            }
            state.agents.insert(agent.id, agent.clone());
        }

        if let Some(stored) = state.reinstatements.get_mut(&request.id) {
            stored.status = request.status;
            stored.approver = request.approver.clone();
            stored.decided_at = request.decided_at;
            stored.conditions = request.conditions.clone();
            stored.probation_days = request.probation_days;
            stored.rejection_reason = request.rejection_reason.clone();
            stored.system_decided = request.system_decided;
            stored.updated_at = request.updated_at;
        }
        self.reinstatement_resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: ReinstatementId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        let stored = state
            .reinstatements
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Reinstatement {}", id)))?;
        stored
            .complete(at)
            .map_err(|e| RepositoryError::InvalidState(e.to_string()))
    }

    async fn append_error(&self, id: ReinstatementId, error: &StepError) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        let stored = state
            .reinstatements
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Reinstatement {}", id)))?;
        stored.record_step_error(error.clone());
        Ok(())
    }
}

#[async_trait]
impl ArchiveRepository for InMemoryLifecycleStore {
    async fn save(&self, archive: &DataArchive) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.write();
        // One archive per termination; a re-run keeps the first snapshot
        if !state
            .archives
            .iter()
            .any(|a| a.termination_id == archive.termination_id)
        {
            state.archives.push(archive.clone());
        }
        Ok(())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<DataArchive>, RepositoryError> {
        let state = self.state.read();
        Ok(state.archives.iter().filter(|a| a.agent_id == agent_id).cloned().collect())
    }
}

#[async_trait]
impl BatchLogRepository for InMemoryLifecycleStore {
    async fn append(&self, log: &BatchOperationLog) -> Result<(), RepositoryError> {
        self.check_available()?;
        self.state.write().batch_logs.push(log.clone());
        Ok(())
    }

    async fn get(&self, id: BatchRunId) -> Result<Option<BatchOperationLog>, RepositoryError> {
        Ok(self.state.read().batch_logs.iter().find(|l| l.id == id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<BatchOperationLog>, RepositoryError> {
        let state = self.state.read();
        // Newest append first among equal start times
        let mut logs: Vec<BatchOperationLog> = state.batch_logs.iter().rev().cloned().collect();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs.truncate(limit);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::license::LicenseType;
    use crate::domain::license_rules::{DecisionContext, LicenseAction, LicenseRuleEngine};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded() -> (InMemoryLifecycleStore, Agent, License) {
        let store = InMemoryLifecycleStore::new();
        let agent = Agent::new("Marta Silva", "marta@example.org");
        AgentRepository::save(&store, &agent).await.unwrap();
        let license = License::issue(
            agent.id,
            "LIFE",
            "LIC-100",
            LicenseType::Provisional,
            date(2023, 1, 1),
            date(2024, 1, 1),
        );
        store.insert(&license).await.unwrap();
        (store, agent, license)
    }

    #[tokio::test]
    async fn test_apply_transition_writes_one_audit_entry() {
        let (store, _, license) = seeded().await;
        let transition = LicenseRuleEngine::decide(
            &license,
            &LicenseAction::Renew,
            DecisionContext::on(date(2023, 12, 1)),
        )
        .into_result()
        .unwrap();

        let updated = store.apply_transition(&transition, "clerk", Utc::now()).await.unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.status(), LicenseStatus::Active);

        let trail = store.audit_trail(license.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, "RENEW");
        assert_eq!(trail[0].actor, "clerk");
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let (store, _, license) = seeded().await;
        let transition = LicenseRuleEngine::decide(
            &license,
            &LicenseAction::Renew,
            DecisionContext::on(date(2023, 12, 1)),
        )
        .into_result()
        .unwrap();

        store.apply_transition(&transition, "clerk", Utc::now()).await.unwrap();
        let second = store.apply_transition(&transition, "clerk", Utc::now()).await;
        assert!(matches!(second, Err(RepositoryError::Conflict(_))));
        assert_eq!(store.audit_trail(license.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_license_number_and_primary_rejected() {
        let (store, agent, _) = seeded().await;
        let dup = License::issue(agent.id, "LIFE", "LIC-100", LicenseType::Permanent, date(2023, 1, 1), date(2028, 1, 1));
        assert!(matches!(store.insert(&dup).await, Err(RepositoryError::Conflict(_))));

        let first = License::issue(agent.id, "HEALTH", "LIC-200", LicenseType::Permanent, date(2023, 1, 1), date(2028, 1, 1)).primary();
        store.insert(&first).await.unwrap();
        let second = License::issue(agent.id, "AUTO", "LIC-300", LicenseType::Permanent, date(2023, 1, 1), date(2028, 1, 1)).primary();
        assert!(matches!(store.insert(&second).await, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_expire_batch_is_all_or_nothing() {
        let (store, agent, license) = seeded().await;
        let other = License::issue(agent.id, "HEALTH", "LIC-101", LicenseType::Permanent, date(2019, 1, 1), date(2024, 1, 1));
        store.insert(&other).await.unwrap();

        let ctx = DecisionContext::on(date(2024, 2, 1));
        let transitions: Vec<Transition> = [&license, &other]
            .iter()
            .map(|l| LicenseRuleEngine::decide(l, &LicenseAction::MarkExpired, ctx).into_result().unwrap())
            .collect();

        store.fail_license(other.id);
        assert!(store.expire_batch(&transitions, "sweep", Utc::now()).await.is_err());
        assert_eq!(LicenseRepository::get(&store, license.id).await.unwrap().unwrap().status(), LicenseStatus::Active);
        assert!(store.audit_trail(license.id).await.unwrap().is_empty());

        let outcome = store.expire_batch(&transitions[..1], "sweep", Utc::now()).await.unwrap();
        assert_eq!(outcome.expired.len(), 1);
        // HEALTH license is still in force
        assert!(outcome.deactivated_agents.is_empty());
        assert_eq!(AgentRepository::get(&store, agent.id).await.unwrap().unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_reinstatement_resolve_is_guarded() {
        let store = InMemoryLifecycleStore::new();
        let agent = Agent::new("Jon Park", "jon@example.org");
        AgentRepository::save(&store, &agent).await.unwrap();

        let mut request = ReinstatementRequest::new(agent.id, "Appeal", "jon", Utc::now(), chrono::Duration::days(30));
        store.create(&request).await.unwrap();

        let duplicate = ReinstatementRequest::new(agent.id, "Again", "jon", Utc::now(), chrono::Duration::days(30));
        assert!(matches!(store.create(&duplicate).await, Err(RepositoryError::Conflict(_))));

        request
            .resolve(
                &crate::domain::reinstatement::ReinstatementDecision::Reject {
                    approver: "manager".to_string(),
                    reason: "Insufficient evidence".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        store.resolve(&request, None).await.unwrap();
        assert!(matches!(store.resolve(&request, None).await, Err(RepositoryError::InvalidState(_))));
        assert_eq!(store.reinstatement_resolution_count(), 1);

        // A new request is allowed once the previous one is resolved
        store.create(&duplicate).await.unwrap();
    }
}
