// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Batch Log Repository
//!
//! Append-only `batch_operation_logs` table. Id lists are stored as JSONB
//! arrays; a sweep log is written once when its run finishes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::batch::{BatchOperationLog, BatchRunId, SweepPhase};
use crate::domain::license::LicenseId;
use crate::domain::repository::{BatchLogRepository, RepositoryError};

pub struct PostgresBatchLogRepository {
    pool: PgPool,
}

impl PostgresBatchLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn count(row: &PgRow, column: &str) -> usize {
    let value: i32 = row.get(column);
    usize::try_from(value).unwrap_or_default()
}

fn log_from_row(row: &PgRow) -> Result<BatchOperationLog, RepositoryError> {
    let phase_str: String = row.get("phase");
    let phase = SweepPhase::parse(&phase_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("Unknown sweep phase: {}", phase_str)))?;
    let failed_ids: Vec<LicenseId> = serde_json::from_value(row.get("failed_ids"))?;
    let affected_license_ids: Vec<LicenseId> = serde_json::from_value(row.get("affected_license_ids"))?;
    let affected_agent_ids: BTreeSet<AgentId> = serde_json::from_value(row.get("affected_agent_ids"))?;
    let failed_agent_ids: BTreeSet<AgentId> = serde_json::from_value(row.get("failed_agent_ids"))?;

    Ok(BatchOperationLog {
        id: BatchRunId(row.get("id")),
        run_date: row.get("run_date"),
        phase,
        dry_run: row.get("dry_run"),
        chunk_size: count(row, "chunk_size"),
        chunks: count(row, "chunks"),
        total_found: count(row, "total_found"),
        succeeded: count(row, "succeeded"),
        failed: count(row, "failed"),
        failed_ids,
        affected_license_ids,
        affected_agent_ids,
        failed_agent_ids,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}

#[async_trait]
impl BatchLogRepository for PostgresBatchLogRepository {
    async fn append(&self, log: &BatchOperationLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO batch_operation_logs (
                id, run_date, phase, dry_run, chunk_size, chunks, total_found, succeeded,
                failed, failed_ids, affected_license_ids, affected_agent_ids, failed_agent_ids,
                started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(log.id.0)
        .bind(log.run_date)
        .bind(log.phase.as_str())
        .bind(log.dry_run)
        .bind(log.chunk_size as i32)
        .bind(log.chunks as i32)
        .bind(log.total_found as i32)
        .bind(log.succeeded as i32)
        .bind(log.failed as i32)
        .bind(serde_json::to_value(&log.failed_ids)?)
        .bind(serde_json::to_value(&log.affected_license_ids)?)
        .bind(serde_json::to_value(&log.affected_agent_ids)?)
        .bind(serde_json::to_value(&log.failed_agent_ids)?)
        .bind(log.started_at)
        .bind(log.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: BatchRunId) -> Result<Option<BatchOperationLog>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM batch_operation_logs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(log_from_row).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<BatchOperationLog>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM batch_operation_logs ORDER BY started_at DESC, finished_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(log_from_row).collect()
    }
}
