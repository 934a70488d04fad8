// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Expiry Sweep
//!
//! Finds ACTIVE licenses whose renewal date has passed, marks them EXPIRED
//! in bounded chunks and sets agents left without any license in force to
//! INACTIVE.
//!
//! # Run phases
//!
//! ```text
//! SCANNING → BATCHING → DRY_RUN_DONE
//!                     → COMMITTING → DONE
//! ```
//!
//! Each chunk is first attempted as one bulk unit
//! (`LicenseRepository::expire_batch`). If the bulk unit fails, the chunk is
//! retried license by license so that one bad row does not hold back the
//! rest; licenses that still fail are listed in the run log.
//!
//! A run writes exactly one [`BatchOperationLog`], at the end, whatever the
//! outcome of its chunks. Running again the same day finds nothing new:
//! EXPIRED licenses no longer match the scan.
//!
//! Agents whose deactivation fails are listed in the log's
//! `failed_agent_ids`. The next committed run reads them back from the most
//! recent committed log and retries them before scanning; agents that fail
//! again are listed again, so pending deactivations carry forward.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::batch::{BatchOperationLog, PhaseError, SweepPhase};
use crate::domain::clock::Clock;
use crate::domain::events::SweepEvent;
use crate::domain::license::{License, LicenseStatus};
use crate::domain::license_rules::{DecisionContext, LicenseAction, LicenseRuleEngine, Transition};
use crate::domain::repository::{AgentRepository, BatchLogRepository, LicenseRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// How many recent logs are searched for the last committed run.
const PENDING_LOOKBACK_RUNS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Expiry scan failed: {0}")]
    Scan(#[source] RepositoryError),

    #[error("Previous sweep logs could not be read: {0}")]
    History(#[source] RepositoryError),

    #[error("Sweep run {run_id} finished but its log could not be written: {source}")]
    LogWrite {
        run_id: String,
        #[source]
        source: RepositoryError,
    },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("Chunk size must be at least 1")]
    InvalidChunkSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    pub run_date: NaiveDate,
    pub dry_run: bool,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub log: BatchOperationLog,
    /// Agents set INACTIVE by this run. Empty on a dry run.
    pub deactivated_agents: BTreeSet<AgentId>,
}

pub struct ExpirySweep {
    licenses: Arc<dyn LicenseRepository>,
    agents: Arc<dyn AgentRepository>,
    batch_logs: Arc<dyn BatchLogRepository>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    actor: String,
}

impl ExpirySweep {
    pub fn new(
        licenses: Arc<dyn LicenseRepository>,
        agents: Arc<dyn AgentRepository>,
        batch_logs: Arc<dyn BatchLogRepository>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            licenses,
            agents,
            batch_logs,
            clock,
            event_bus,
            actor: actor.into(),
        }
    }

    /// Licenses the sweep would expire on `today`, ordered by renewal date.
    pub async fn scan(&self, today: NaiveDate) -> Result<Vec<License>, RepositoryError> {
        let mut found: Vec<License> = self
            .licenses
            .find_by_status(LicenseStatus::Active)
            .await?
            .into_iter()
            .filter(|l| LicenseRuleEngine::is_expired(l, today))
            .collect();
        found.sort_by(|a, b| a.renewal_date().cmp(&b.renewal_date()).then(a.id.0.cmp(&b.id.0)));
        Ok(found)
    }

    pub async fn run(&self, options: SweepOptions) -> Result<SweepReport, SweepError> {
        if options.chunk_size == 0 {
            return Err(SweepError::InvalidChunkSize);
        }
        let timer = Instant::now();
        let mut log = BatchOperationLog::start(
            options.run_date,
            options.dry_run,
            options.chunk_size,
            self.clock.now(),
        );
        info!(
            run_id = %log.id,
            run_date = %options.run_date,
            dry_run = options.dry_run,
            chunk_size = options.chunk_size,
            "Expiry sweep started"
        );

        let mut deactivated = BTreeSet::new();
        if !options.dry_run {
            let pending = self.pending_deactivations().await.map_err(SweepError::History)?;
            if !pending.is_empty() {
                info!(run_id = %log.id, count = pending.len(), "Retrying agent deactivations from the previous run");
                self.deactivate_agents(pending, &mut log, &mut deactivated).await;
            }
        }

        let found = self.scan(options.run_date).await.map_err(SweepError::Scan)?;
        log.total_found = found.len();
        log.advance(SweepPhase::Batching)?;
        log.chunks = found.chunks(options.chunk_size).count();

        if options.dry_run {
            for license in &found {
                log.affected_license_ids.push(license.id);
                log.affected_agent_ids.insert(license.agent_id);
            }
            log.advance(SweepPhase::DryRunDone)?;
        } else {
            log.advance(SweepPhase::Committing)?;
            for (index, chunk) in found.chunks(options.chunk_size).enumerate() {
                self.commit_chunk(index, chunk, options.run_date, &mut log, &mut deactivated)
                    .await;
            }
            log.advance(SweepPhase::Done)?;
        }

        let finished_at = self.clock.now();
        log.finish(finished_at);
        if let Err(e) = self.batch_logs.append(&log).await {
            error!(run_id = %log.id, error = %e, "Failed to write sweep log");
            return Err(SweepError::LogWrite {
                run_id: log.id.to_string(),
                source: e,
            });
        }

        metrics::counter!("lifecycle_sweep_runs_total", "dry_run" => options.dry_run.to_string())
            .increment(1);
        metrics::counter!("lifecycle_sweep_licenses_expired_total").increment(log.succeeded as u64);
        metrics::counter!("lifecycle_sweep_licenses_failed_total").increment(log.failed as u64);
        metrics::counter!("lifecycle_sweep_agents_deactivated_total").increment(deactivated.len() as u64);
        metrics::counter!("lifecycle_sweep_agent_deactivation_failures_total")
            .increment(log.failed_agent_ids.len() as u64);
        metrics::histogram!("lifecycle_sweep_duration_seconds").record(timer.elapsed().as_secs_f64());

        info!(
            run_id = %log.id,
            phase = log.phase.as_str(),
            total_found = log.total_found,
            succeeded = log.succeeded,
            failed = log.failed,
            deactivated_agents = deactivated.len(),
            failed_agents = log.failed_agent_ids.len(),
            "Expiry sweep finished"
        );
        if !log.is_clean() {
            warn!(run_id = %log.id, "Expiry sweep left failures; see failed_ids and failed_agent_ids");
        }
        self.event_bus.publish_sweep_event(SweepEvent::SweepCompleted {
            run_id: log.id,
            phase: log.phase,
            dry_run: log.dry_run,
            total_found: log.total_found,
            succeeded: log.succeeded,
            failed: log.failed,
            deactivated_agents: deactivated.len(),
            completed_at: finished_at,
        });

        Ok(SweepReport {
            log,
            deactivated_agents: deactivated,
        })
    }

    async fn commit_chunk(
        &self,
        index: usize,
        chunk: &[License],
        run_date: NaiveDate,
        log: &mut BatchOperationLog,
        deactivated: &mut BTreeSet<AgentId>,
    ) {
        let ctx = DecisionContext::on(run_date);
        let mut transitions: Vec<Transition> = Vec::with_capacity(chunk.len());
        for license in chunk {
            match LicenseRuleEngine::decide(license, &LicenseAction::MarkExpired, ctx).into_result() {
                Ok(t) => transitions.push(t),
                Err(reason) => {
                    warn!(license_id = %license.id, reason = %reason, "License no longer expirable");
                    log.record_failure(license.id);
                }
            }
        }
        if transitions.is_empty() {
            return;
        }

        let now = self.clock.now();
        match self.licenses.expire_batch(&transitions, &self.actor, now).await {
            Ok(outcome) => {
                debug!(chunk = index, expired = outcome.expired.len(), "Chunk committed");
                for license in &outcome.expired {
                    log.record_success(license.id, license.agent_id);
                }
                deactivated.extend(outcome.deactivated_agents);
            }
            Err(e) => {
                warn!(chunk = index, size = transitions.len(), error = %e, "Bulk expiry failed, retrying per license");
                metrics::counter!("lifecycle_sweep_chunk_fallbacks_total").increment(1);
                self.commit_individually(&transitions, log, deactivated).await;
            }
        }
    }

    async fn commit_individually(
        &self,
        transitions: &[Transition],
        log: &mut BatchOperationLog,
        deactivated: &mut BTreeSet<AgentId>,
    ) {
        let mut touched_agents = BTreeSet::new();
        for transition in transitions {
            let now = self.clock.now();
            match self.licenses.apply_transition(transition, &self.actor, now).await {
                Ok(license) => {
                    log.record_success(license.id, license.agent_id);
                    touched_agents.insert(license.agent_id);
                }
                Err(e) => {
                    warn!(license_id = %transition.license_id, error = %e, "License could not be expired");
                    log.record_failure(transition.license_id);
                }
            }
        }

        self.deactivate_agents(touched_agents, log, deactivated).await;
    }

    /// Agents listed as failed by the most recent committed run.
    async fn pending_deactivations(&self) -> Result<BTreeSet<AgentId>, RepositoryError> {
        let recent = self.batch_logs.list_recent(PENDING_LOOKBACK_RUNS).await?;
        Ok(recent
            .into_iter()
            .find(|l| !l.dry_run)
            .map(|l| l.failed_agent_ids)
            .unwrap_or_default())
    }

    async fn deactivate_agents(
        &self,
        agents: impl IntoIterator<Item = AgentId>,
        log: &mut BatchOperationLog,
        deactivated: &mut BTreeSet<AgentId>,
    ) {
        for agent_id in agents {
            match self.agents.deactivate_if_unlicensed(agent_id, self.clock.now()).await {
                Ok(true) => {
                    deactivated.insert(agent_id);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "Agent deactivation failed");
                    log.record_agent_failure(agent_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{Agent, AgentStatus};
    use crate::domain::clock::SystemClock;
    use crate::domain::license::LicenseType;
    use crate::infrastructure::repositories::InMemoryLifecycleStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryLifecycleStore>,
        sweep: ExpirySweep,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let sweep = ExpirySweep::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(SystemClock),
            EventBus::with_default_capacity(),
            "system:expiry-sweep",
        );
        Fixture { store, sweep }
    }

    async fn agent_with_license(store: &InMemoryLifecycleStore, number: &str, renewal: NaiveDate) -> (Agent, License) {
        let agent = Agent::new(format!("Agent {}", number), format!("{}@example.com", number));
        AgentRepository::save(store, &agent).await.unwrap();
        let license = License::issue(agent.id, "LIFE", number, LicenseType::Permanent, date(2020, 1, 1), renewal);
        LicenseRepository::insert(store, &license).await.unwrap();
        (agent, license)
    }

    fn options(dry_run: bool, chunk_size: usize) -> SweepOptions {
        SweepOptions {
            run_date: date(2025, 3, 1),
            dry_run,
            chunk_size,
        }
    }

    #[tokio::test]
    async fn test_chunks_and_deactivation() {
        let fx = fixture();
        for i in 0..5 {
            agent_with_license(&fx.store, &format!("EXP-{}", i), date(2025, 2, 1)).await;
        }
        let (current_agent, _) = agent_with_license(&fx.store, "CUR-1", date(2026, 2, 1)).await;

        let report = fx.sweep.run(options(false, 2)).await.unwrap();
        assert_eq!(report.log.phase, SweepPhase::Done);
        assert_eq!(report.log.total_found, 5);
        assert_eq!(report.log.chunks, 3);
        assert_eq!(report.log.succeeded, 5);
        assert_eq!(report.deactivated_agents.len(), 5);
        assert!(report.log.is_accounted());

        let current = AgentRepository::get(fx.store.as_ref(), current_agent.id).await.unwrap().unwrap();
        assert_eq!(current.status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_bulk_failure_falls_back_per_license() {
        let fx = fixture();
        let (_, bad) = agent_with_license(&fx.store, "EXP-BAD", date(2025, 1, 15)).await;
        agent_with_license(&fx.store, "EXP-OK1", date(2025, 2, 1)).await;
        agent_with_license(&fx.store, "EXP-OK2", date(2025, 2, 2)).await;
        fx.store.fail_bulk_expiry(true);
        fx.store.fail_license(bad.id);

        let report = fx.sweep.run(options(false, 100)).await.unwrap();
        assert_eq!(report.log.succeeded, 2);
        assert_eq!(report.log.failed, 1);
        assert_eq!(report.log.failed_ids, vec![bad.id]);
        assert_eq!(report.deactivated_agents.len(), 2);
        assert!(report.log.is_accounted());

        let logs = BatchLogRepository::list_recent(fx.store.as_ref(), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_deactivation_is_logged_and_retried() {
        let fx = fixture();
        let (agent, license) = agent_with_license(&fx.store, "EXP-AGT", date(2025, 2, 1)).await;
        fx.store.fail_bulk_expiry(true);
        fx.store.fail_agent_deactivation(agent.id, true);

        let first = fx.sweep.run(options(false, 100)).await.unwrap();
        assert_eq!(first.log.succeeded, 1);
        assert_eq!(first.log.affected_license_ids, vec![license.id]);
        assert!(first.log.failed_agent_ids.contains(&agent.id));
        assert!(!first.log.is_clean());
        assert!(first.deactivated_agents.is_empty());
        let stuck = AgentRepository::get(fx.store.as_ref(), agent.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, AgentStatus::Active);

        // Still failing: carried into the next log
        let second = fx.sweep.run(options(false, 100)).await.unwrap();
        assert_eq!(second.log.total_found, 0);
        assert!(second.log.failed_agent_ids.contains(&agent.id));

        fx.store.fail_agent_deactivation(agent.id, false);
        let third = fx.sweep.run(options(false, 100)).await.unwrap();
        assert!(third.log.is_clean());
        assert!(third.deactivated_agents.contains(&agent.id));
        let repaired = AgentRepository::get(fx.store.as_ref(), agent.id).await.unwrap().unwrap();
        assert_eq!(repaired.status, AgentStatus::Inactive);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutating() {
        let fx = fixture();
        agent_with_license(&fx.store, "EXP-1", date(2025, 2, 1)).await;
        let before = fx.store.license_mutation_count();

        let report = fx.sweep.run(options(true, 100)).await.unwrap();
        assert_eq!(report.log.phase, SweepPhase::DryRunDone);
        assert_eq!(report.log.affected_license_ids.len(), 1);
        assert_eq!(report.log.succeeded, 0);
        assert_eq!(fx.store.license_mutation_count(), before);
        assert!(report.log.dry_run);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.sweep.run(options(false, 0)).await,
            Err(SweepError::InvalidChunkSize)
        ));
    }
}
