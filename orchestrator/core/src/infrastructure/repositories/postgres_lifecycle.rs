// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Lifecycle Repository
//!
//! Agents, termination records, reinstatement requests and data archives.
//! These share one repository because the units that flip agent status
//! (termination start, reinstatement approval) must write the agent row and
//! the process record in the same transaction.
//!
//! The reinstatement terminal guard is the `WHERE status = 'PENDING'`
//! predicate on the resolving `UPDATE`; the partial unique index
//! `reinstatement_requests_one_pending` enforces one open request per agent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::domain::agent::{Agent, AgentId, AgentStatus, TerminationDetails};
use crate::domain::archive::{ArchiveId, DataArchive};
use crate::domain::process::StepError;
use crate::domain::reinstatement::{ReinstatementId, ReinstatementRequest, ReinstatementStatus};
use crate::domain::repository::{
    AgentRepository, ArchiveRepository, ReinstatementRepository, RepositoryError, TerminationRepository,
};
use crate::domain::termination::{TerminationId, TerminationRecord, WorkflowStatus};

pub struct PostgresLifecycleRepository {
    pool: PgPool,
}

impl PostgresLifecycleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn agent_from_row(row: &PgRow) -> Result<Agent, RepositoryError> {
    let status_str: String = row.get("status");
    let status = AgentStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown agent status: {}", status_str)))?;
    let termination: Option<serde_json::Value> = row.get("termination");
    let termination: Option<TerminationDetails> = termination.map(serde_json::from_value).transpose()?;
    let version: i64 = row.get("version");

    Ok(Agent {
        id: AgentId(row.get("id")),
        name: row.get("name"),
        email: row.get("email"),
        status,
        commission_enabled: row.get("commission_enabled"),
        portal_access_enabled: row.get("portal_access_enabled"),
        termination,
        version: u64::try_from(version).unwrap_or_default(),
        updated_at: row.get("updated_at"),
    })
}

fn termination_from_row(row: &PgRow) -> Result<TerminationRecord, RepositoryError> {
    let status_str: String = row.get("workflow_status");
    let workflow_status = WorkflowStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown workflow status: {}", status_str)))?;

    Ok(TerminationRecord {
        id: TerminationId(row.get("id")),
        agent_id: AgentId(row.get("agent_id")),
        reason: row.get("reason"),
        reason_code: row.get("reason_code"),
        effective_date: row.get("effective_date"),
        initiated_by: row.get("initiated_by"),
        flags: serde_json::from_value(row.get("flags"))?,
        letter_url: row.get("letter_url"),
        workflow_status,
        errors: serde_json::from_value(row.get("errors"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn reinstatement_from_row(row: &PgRow) -> Result<ReinstatementRequest, RepositoryError> {
    let status_str: String = row.get("status");
    let status = ReinstatementStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown reinstatement status: {}", status_str)))?;
    let probation_days: Option<i32> = row.get("probation_days");

    Ok(ReinstatementRequest {
        id: ReinstatementId(row.get("id")),
        agent_id: AgentId(row.get("agent_id")),
        reason: row.get("reason"),
        requested_by: row.get("requested_by"),
        status,
        approver: row.get("approver"),
        decided_at: row.get("decided_at"),
        conditions: row.get("conditions"),
        probation_days: probation_days.and_then(|d| u32::try_from(d).ok()),
        rejection_reason: row.get("rejection_reason"),
        system_decided: row.get("system_decided"),
        decision_deadline: row.get("decision_deadline"),
        process_started_at: row.get("process_started_at"),
        errors: serde_json::from_value(row.get("errors"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Version-checked agent overwrite inside a transaction.
async fn update_agent_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    agent: &Agent,
    expected_version: u64,
) -> Result<(), RepositoryError> {
    let termination = agent.termination.as_ref().map(serde_json::to_value).transpose()?;
    let result = sqlx::query(
        r#"
        UPDATE agents SET
            status = $3, commission_enabled = $4, portal_access_enabled = $5,
            termination = $6, version = $7, updated_at = $8
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(agent.id.0)
    .bind(expected_version as i64)
    .bind(agent.status.as_str())
    .bind(agent.commission_enabled)
    .bind(agent.portal_access_enabled)
    .bind(termination)
    .bind(agent.version as i64)
    .bind(agent.updated_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "Agent {} is missing or no longer at version {}",
            agent.id, expected_version
        )));
    }
    Ok(())
}

#[async_trait]
impl AgentRepository for PostgresLifecycleRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let termination = agent.termination.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, email, status, commission_enabled, portal_access_enabled,
                termination, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                status = EXCLUDED.status,
                commission_enabled = EXCLUDED.commission_enabled,
                portal_access_enabled = EXCLUDED.portal_access_enabled,
                termination = EXCLUDED.termination,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.name)
        .bind(&agent.email)
        .bind(agent.status.as_str())
        .bind(agent.commission_enabled)
        .bind(agent.portal_access_enabled)
        .bind(termination)
        .bind(agent.version as i64)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save agent: {}", e)))?;

        Ok(())
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, status, commission_enabled, portal_access_enabled,
                   termination, version, updated_at
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(agent_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, email, status, commission_enabled, portal_access_enabled,
                   termination, version, updated_at
            FROM agents
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(agent_from_row).collect()
    }

    async fn deactivate_if_unlicensed(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE agents a SET status = 'INACTIVE', version = a.version + 1, updated_at = $2
            WHERE a.id = $1 AND a.status = 'ACTIVE'
              AND NOT EXISTS (
                  SELECT 1 FROM licenses l
                  WHERE l.agent_id = a.id AND NOT l.deleted AND l.status IN ('ACTIVE', 'RENEWED')
              )
            "#,
        )
        .bind(id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_access(
        &self,
        id: AgentId,
        portal_access: Option<bool>,
        commission: Option<bool>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE agents SET
                portal_access_enabled = COALESCE($2, portal_access_enabled),
                commission_enabled = COALESCE($3, commission_enabled),
                version = version + 1,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(portal_access)
        .bind(commission)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Agent {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl TerminationRepository for PostgresLifecycleRepository {
    async fn begin(
        &self,
        record: &TerminationRecord,
        agent: &Agent,
        expected_agent_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        update_agent_in_tx(&mut tx, agent, expected_agent_version).await?;

        sqlx::query(
            r#"
            INSERT INTO termination_records (
                id, agent_id, reason, reason_code, effective_date, initiated_by, flags,
                letter_url, workflow_status, errors, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id.0)
        .bind(record.agent_id.0)
        .bind(&record.reason)
        .bind(&record.reason_code)
        .bind(record.effective_date)
        .bind(&record.initiated_by)
        .bind(serde_json::to_value(&record.flags)?)
        .bind(&record.letter_url)
        .bind(record.workflow_status.as_str())
        .bind(serde_json::to_value(&record.errors)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: TerminationId) -> Result<Option<TerminationRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM termination_records WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(termination_from_row).transpose()
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<TerminationRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM termination_records WHERE agent_id = $1 ORDER BY created_at")
            .bind(agent_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(termination_from_row).collect()
    }

    async fn find_unfinished(&self) -> Result<Vec<TerminationRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM termination_records WHERE workflow_status IN ('PENDING', 'IN_PROGRESS') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(termination_from_row).collect()
    }

    async fn save_progress(&self, record: &TerminationRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE termination_records SET
                flags = $2, letter_url = $3, workflow_status = $4, errors = $5,
                updated_at = $6, completed_at = $7
            WHERE id = $1 AND workflow_status NOT IN ('COMPLETED', 'FAILED')
            "#,
        )
        .bind(record.id.0)
        .bind(serde_json::to_value(&record.flags)?)
        .bind(&record.letter_url)
        .bind(record.workflow_status.as_str())
        .bind(serde_json::to_value(&record.errors)?)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM termination_records WHERE id = $1")
                .bind(record.id.0)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                RepositoryError::InvalidState(format!("Termination {} is already finished", record.id))
            } else {
                RepositoryError::NotFound(format!("Termination {}", record.id))
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReinstatementRepository for PostgresLifecycleRepository {
    async fn create(&self, request: &ReinstatementRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO reinstatement_requests (
                id, agent_id, reason, requested_by, status, system_decided,
                decision_deadline, errors, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, '[]'::jsonb, $7, $8)
            "#,
        )
        .bind(request.id.0)
        .bind(request.agent_id.0)
        .bind(&request.reason)
        .bind(&request.requested_by)
        .bind(request.status.as_str())
        .bind(request.decision_deadline)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match RepositoryError::from(e) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "Agent {} already has a pending reinstatement request",
                request.agent_id
            )),
            other => other,
        })?;

        Ok(())
    }

    async fn get(&self, id: ReinstatementId) -> Result<Option<ReinstatementRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM reinstatement_requests WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(reinstatement_from_row).transpose()
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<ReinstatementRequest>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM reinstatement_requests WHERE agent_id = $1 ORDER BY created_at")
            .bind(agent_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(reinstatement_from_row).collect()
    }

    async fn find_by_status(
        &self,
        status: ReinstatementStatus,
    ) -> Result<Vec<ReinstatementRequest>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM reinstatement_requests WHERE status = $1 ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(reinstatement_from_row).collect()
    }

    async fn mark_process_started(
        &self,
        id: ReinstatementId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE reinstatement_requests SET process_started_at = COALESCE(process_started_at, $2) WHERE id = $1",
        )
        .bind(id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Reinstatement {}", id)));
        }
        Ok(())
    }

    async fn resolve(
        &self,
        request: &ReinstatementRequest,
        agent: Option<(&Agent, u64)>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE reinstatement_requests SET
                status = $2, approver = $3, decided_at = $4, conditions = $5,
                probation_days = $6, rejection_reason = $7, system_decided = $8, updated_at = $9
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(request.id.0)
        .bind(request.status.as_str())
        .bind(&request.approver)
        .bind(request.decided_at)
        .bind(&request.conditions)
        .bind(request.probation_days.map(|d| d as i32))
        .bind(&request.rejection_reason)
        .bind(request.system_decided)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::InvalidState(format!(
                "Reinstatement {} is missing or no longer PENDING",
                request.id
            )));
        }

        if let Some((agent, expected_version)) = agent {
            update_agent_in_tx(&mut tx, agent, expected_version).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: ReinstatementId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE reinstatement_requests SET status = 'COMPLETED', updated_at = $2 WHERE id = $1 AND status = 'APPROVED'",
        )
        .bind(id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::InvalidState(format!(
                "Reinstatement {} is missing or not APPROVED",
                id
            )));
        }
        Ok(())
    }

    async fn append_error(&self, id: ReinstatementId, error: &StepError) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE reinstatement_requests SET errors = errors || $2::jsonb, updated_at = $3 WHERE id = $1",
        )
        .bind(id.0)
        .bind(serde_json::Value::Array(vec![serde_json::to_value(error)?]))
        .bind(error.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ArchiveRepository for PostgresLifecycleRepository {
    async fn save(&self, archive: &DataArchive) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO data_archives (id, agent_id, termination_id, snapshot, archived_at, retention_until)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (termination_id) DO NOTHING
            "#,
        )
        .bind(archive.id.0)
        .bind(archive.agent_id.0)
        .bind(archive.termination_id.0)
        .bind(&archive.snapshot)
        .bind(archive.archived_at)
        .bind(archive.retention_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<DataArchive>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, termination_id, snapshot, archived_at, retention_until
            FROM data_archives
            WHERE agent_id = $1
            ORDER BY archived_at
            "#,
        )
        .bind(agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DataArchive {
                id: ArchiveId(row.get("id")),
                agent_id: AgentId(row.get("agent_id")),
                termination_id: TerminationId(row.get("termination_id")),
                snapshot: row.get("snapshot"),
                archived_at: row.get("archived_at"),
                retention_until: row.get("retention_until"),
            })
            .collect())
    }
}
