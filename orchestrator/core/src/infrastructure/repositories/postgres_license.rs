// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL License Repository
//!
//! `LicenseRepository` backed by the `licenses` and `license_audit` tables.
//! Every transition runs in one transaction: a version-predicated `UPDATE`
//! followed by the audit `INSERT`. Zero updated rows means another writer got
//! there first and is reported as `RepositoryError::Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::domain::agent::AgentId;
use crate::domain::license::{
    AuditEntry, AuditEntryId, License, LicenseId, LicenseState, LicenseStatus, LicenseType,
};
use crate::domain::license_rules::Transition;
use crate::domain::repository::{ExpiryBatchOutcome, LicenseRepository, RepositoryError};

const LICENSE_COLUMNS: &str = r#"
    id, agent_id, line, license_number, is_primary, issue_date, authority_date,
    status, license_type, renewal_date, renewal_count, exam_passed, exam_date,
    certificate_number, version, deleted, created_at, updated_at
"#;

pub struct PostgresLicenseRepository {
    pool: PgPool,
}

impl PostgresLicenseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn license_from_row(row: &PgRow) -> Result<License, RepositoryError> {
    let status_str: String = row.get("status");
    let status = LicenseStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown license status: {}", status_str)))?;
    let type_str: String = row.get("license_type");
    let license_type = LicenseType::parse(&type_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown license type: {}", type_str)))?;
    let renewal_count: i32 = row.get("renewal_count");
    let version: i64 = row.get("version");

    Ok(License {
        id: LicenseId(row.get("id")),
        agent_id: AgentId(row.get("agent_id")),
        line: row.get("line"),
        license_number: row.get("license_number"),
        is_primary: row.get("is_primary"),
        issue_date: row.get("issue_date"),
        authority_date: row.get("authority_date"),
        state: LicenseState {
            status,
            license_type,
            renewal_date: row.get("renewal_date"),
            renewal_count: u32::try_from(renewal_count).unwrap_or_default(),
            exam_passed: row.get("exam_passed"),
            exam_date: row.get::<Option<NaiveDate>, _>("exam_date"),
            certificate_number: row.get("certificate_number"),
        },
        version: u64::try_from(version).unwrap_or_default(),
        deleted: row.get("deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

async fn apply_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    transition: &Transition,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<License, RepositoryError> {
    let state = &transition.new_state;
    let row = sqlx::query(&format!(
        r#"
        UPDATE licenses SET
            status = $3, license_type = $4, renewal_date = $5, renewal_count = $6,
            exam_passed = $7, exam_date = $8, certificate_number = $9,
            version = version + 1, updated_at = $10
        WHERE id = $1 AND version = $2 AND NOT deleted
        RETURNING {LICENSE_COLUMNS}
        "#
    ))
    .bind(transition.license_id.0)
    .bind(transition.expected_version as i64)
    .bind(state.status.as_str())
    .bind(state.license_type.as_str())
    .bind(state.renewal_date)
    .bind(state.renewal_count as i32)
    .bind(state.exam_passed)
    .bind(state.exam_date)
    .bind(&state.certificate_number)
    .bind(at)
    .fetch_optional(&mut **tx)
    .await?;

    let license = match row {
        Some(row) => license_from_row(&row)?,
        None => {
            return Err(RepositoryError::Conflict(format!(
                "License {} is missing or no longer at version {}",
                transition.license_id, transition.expected_version
            )))
        }
    };

    sqlx::query(
        r#"
        INSERT INTO license_audit (id, license_id, action, old_state, new_state, actor, reason, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(AuditEntryId::new().0)
    .bind(transition.license_id.0)
    .bind(&transition.action)
    .bind(serde_json::to_value(&transition.old_state)?)
    .bind(serde_json::to_value(&transition.new_state)?)
    .bind(actor)
    .bind(&transition.reason)
    .bind(at)
    .execute(&mut **tx)
    .await?;

    Ok(license)
}

#[async_trait]
impl LicenseRepository for PostgresLicenseRepository {
    async fn insert(&self, license: &License) -> Result<(), RepositoryError> {
        let state = &license.state;
        sqlx::query(
            r#"
            INSERT INTO licenses (
                id, agent_id, line, license_number, is_primary, issue_date, authority_date,
                status, license_type, renewal_date, renewal_count, exam_passed, exam_date,
                certificate_number, version, deleted, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(license.id.0)
        .bind(license.agent_id.0)
        .bind(&license.line)
        .bind(&license.license_number)
        .bind(license.is_primary)
        .bind(license.issue_date)
        .bind(license.authority_date)
        .bind(state.status.as_str())
        .bind(state.license_type.as_str())
        .bind(state.renewal_date)
        .bind(state.renewal_count as i32)
        .bind(state.exam_passed)
        .bind(state.exam_date)
        .bind(&state.certificate_number)
        .bind(license.version as i64)
        .bind(license.deleted)
        .bind(license.created_at)
        .bind(license.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: LicenseId) -> Result<Option<License>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE id = $1 AND NOT deleted"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(license_from_row).transpose()
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Vec<License>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE agent_id = $1 AND NOT deleted ORDER BY issue_date, license_number"
        ))
        .bind(agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(license_from_row).collect()
    }

    async fn find_by_status(&self, status: LicenseStatus) -> Result<Vec<License>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LICENSE_COLUMNS} FROM licenses WHERE status = $1 AND NOT deleted ORDER BY renewal_date, id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(license_from_row).collect()
    }

    async fn apply_transition(
        &self,
        transition: &Transition,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<License, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let license = apply_in_tx(&mut tx, transition, actor, at).await?;
        tx.commit().await?;
        Ok(license)
    }

    async fn expire_batch(
        &self,
        transitions: &[Transition],
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<ExpiryBatchOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = ExpiryBatchOutcome::default();

        for transition in transitions {
            // Any error drops `tx`, which rolls the whole chunk back
            let license = apply_in_tx(&mut tx, transition, actor, at).await?;
            outcome.expired.push(license);
        }

        let mut agent_ids: Vec<uuid::Uuid> = outcome.expired.iter().map(|l| l.agent_id.0).collect();
        agent_ids.sort();
        agent_ids.dedup();

        let rows = sqlx::query(
            r#"
            UPDATE agents a SET status = 'INACTIVE', version = a.version + 1, updated_at = $2
            WHERE a.id = ANY($1) AND a.status = 'ACTIVE'
              AND NOT EXISTS (
                  SELECT 1 FROM licenses l
                  WHERE l.agent_id = a.id AND NOT l.deleted AND l.status IN ('ACTIVE', 'RENEWED')
              )
            RETURNING a.id
            "#,
        )
        .bind(&agent_ids)
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        outcome.deactivated_agents = rows.iter().map(|r| AgentId(r.get("id"))).collect();
        tx.commit().await?;
        Ok(outcome)
    }

    async fn audit_trail(&self, id: LicenseId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, license_id, action, old_state, new_state, actor, reason, recorded_at
            FROM license_audit
            WHERE license_id = $1
            ORDER BY recorded_at
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: AuditEntryId(row.get("id")),
                    license_id: LicenseId(row.get("license_id")),
                    action: row.get("action"),
                    old_state: serde_json::from_value(row.get("old_state"))?,
                    new_state: serde_json::from_value(row.get("new_state"))?,
                    actor: row.get("actor"),
                    reason: row.get("reason"),
                    recorded_at: row.get("recorded_at"),
                })
            })
            .collect()
    }
}
