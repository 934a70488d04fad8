// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root. Interfaces live in the
//! domain layer and are implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `LicenseRepository` | `License` + audit trail | `InMemoryLifecycleStore`, `PostgresLicenseRepository` |
//! | `AgentRepository` | `Agent` | `InMemoryLifecycleStore`, `PostgresLifecycleRepository` |
//! | `TerminationRepository` | `TerminationRecord` | `InMemoryLifecycleStore`, `PostgresLifecycleRepository` |
//! | `ReinstatementRepository` | `ReinstatementRequest` | `InMemoryLifecycleStore`, `PostgresLifecycleRepository` |
//! | `ArchiveRepository` | `DataArchive` | `InMemoryLifecycleStore`, `PostgresLifecycleRepository` |
//! | `BatchLogRepository` | `BatchOperationLog` | `InMemoryLifecycleStore`, `PostgresBatchLogRepository` |
//!
//! ## Atomic units
//!
//! A few writes span more than one aggregate and must land together or not
//! at all. Each such unit is a single repository method so that the
//! implementation can wrap it in one transaction (or one lock):
//!
//! - `LicenseRepository::apply_transition`: license update + one audit entry
//! - `LicenseRepository::expire_batch`: N license updates + N audit entries +
//!   agent deactivation
//! - `TerminationRepository::begin`: agent flip to TERMINATED + record insert
//! - `ReinstatementRepository::resolve`: request PENDING → APPROVED/REJECTED,
//!   plus agent restore on approval
//!
//! Optimistic concurrency is expressed through `expected_version` arguments;
//! a mismatch is reported as `RepositoryError::Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{Agent, AgentId};
use crate::domain::archive::DataArchive;
use crate::domain::batch::{BatchOperationLog, BatchRunId};
use crate::domain::license::{AuditEntry, License, LicenseId, LicenseStatus};
use crate::domain::license_rules::Transition;
use crate::domain::process::StepError;
use crate::domain::reinstatement::{ReinstatementId, ReinstatementRequest, ReinstatementStatus};
use crate::domain::termination::{TerminationId, TerminationRecord};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Result of a committed bulk expiry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpiryBatchOutcome {
    pub expired: Vec<License>,
    /// Agents flipped to INACTIVE because no license in force remained.
    pub deactivated_agents: Vec<AgentId>,
}

/// License Record Store.
#[async_trait]
pub trait LicenseRepository: Send + Sync {
    /// Insert a newly issued license. Fails with `Conflict` on a duplicate
    /// license number or a second primary license for the same agent.
    async fn insert(&self, license: &License) -> Result<(), RepositoryError>;

    async fn get(&self, id: LicenseId) -> Result<Option<License>, RepositoryError>;

    /// Non-deleted licenses held by an agent.
    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<License>, RepositoryError>;

    async fn find_by_status(&self, status: LicenseStatus) -> Result<Vec<License>, RepositoryError>;

    /// Persist an approved transition and its audit entry in one unit.
    /// Returns the updated license (version incremented).
    async fn apply_transition(
        &self,
        transition: &Transition,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<License, RepositoryError>;

    /// All-or-nothing application of a chunk of expiry transitions. Agents
    /// left without an in-force license are set INACTIVE in the same unit.
    async fn expire_batch(
        &self,
        transitions: &[Transition],
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<ExpiryBatchOutcome, RepositoryError>;

    /// Audit entries for a license, oldest first.
    async fn audit_trail(&self, id: LicenseId) -> Result<Vec<AuditEntry>, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Create or overwrite an agent projection.
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn get(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError>;

    /// Set the agent INACTIVE if it is ACTIVE and holds no license in force.
    /// Returns whether the agent was changed.
    async fn deactivate_if_unlicensed(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Record the outcome of an access step on the projection. `None` leaves
    /// the flag as it is.
    async fn update_access(
        &self,
        id: AgentId,
        portal_access: Option<bool>,
        commission: Option<bool>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TerminationRepository: Send + Sync {
    /// Flip the agent to TERMINATED and insert the record in one unit.
    /// `agent` is the already-terminated projection; the stored agent must
    /// still be at `expected_agent_version`.
    async fn begin(
        &self,
        record: &TerminationRecord,
        agent: &Agent,
        expected_agent_version: u64,
    ) -> Result<(), RepositoryError>;

    async fn get(&self, id: TerminationId) -> Result<Option<TerminationRecord>, RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<TerminationRecord>, RepositoryError>;

    /// Records whose workflow status is PENDING or IN_PROGRESS.
    async fn find_unfinished(&self) -> Result<Vec<TerminationRecord>, RepositoryError>;

    /// Overwrite the progress fields (flags, letter url, status, errors).
    /// A record already COMPLETED or FAILED is left alone and the call fails
    /// with `InvalidState`.
    async fn save_progress(&self, record: &TerminationRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ReinstatementRepository: Send + Sync {
    /// Insert a PENDING request. Fails with `Conflict` if the agent already
    /// has a PENDING request.
    async fn create(&self, request: &ReinstatementRequest) -> Result<(), RepositoryError>;

    async fn get(&self, id: ReinstatementId) -> Result<Option<ReinstatementRequest>, RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<ReinstatementRequest>, RepositoryError>;

    async fn find_by_status(
        &self,
        status: ReinstatementStatus,
    ) -> Result<Vec<ReinstatementRequest>, RepositoryError>;

    async fn mark_process_started(
        &self,
        id: ReinstatementId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Write the decision carried by `request` only if the stored request is
    /// still PENDING; otherwise `InvalidState`. On approval, `agent` (already
    /// reinstated) is written in the same unit against
    /// `expected_agent_version`.
    async fn resolve(
        &self,
        request: &ReinstatementRequest,
        agent: Option<(&Agent, u64)>,
    ) -> Result<(), RepositoryError>;

    /// APPROVED → COMPLETED.
    async fn mark_completed(
        &self,
        id: ReinstatementId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn append_error(&self, id: ReinstatementId, error: &StepError) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    async fn save(&self, archive: &DataArchive) -> Result<(), RepositoryError>;

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<DataArchive>, RepositoryError>;
}

#[async_trait]
pub trait BatchLogRepository: Send + Sync {
    /// Append the log of a finished run. Logs are never updated.
    async fn append(&self, log: &BatchOperationLog) -> Result<(), RepositoryError>;

    async fn get(&self, id: BatchRunId) -> Result<Option<BatchOperationLog>, RepositoryError>;

    /// Most recent runs first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<BatchOperationLog>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Errors worth retrying: the store could not be reached or answered
    /// with a transient failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Database(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
