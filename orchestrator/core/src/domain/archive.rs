// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use uuid::Uuid;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{Agent, AgentId};
use crate::domain::license::License;
use crate::domain::termination::{TerminationId, TerminationRecord};

pub const RETENTION_YEARS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveId(pub Uuid);

impl ArchiveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArchiveId {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of an agent's records taken during termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArchive {
    pub id: ArchiveId,
    pub agent_id: AgentId,
    pub termination_id: TerminationId,
    pub snapshot: serde_json::Value,
    pub archived_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
}

impl DataArchive {
    pub fn capture(
        agent: &Agent,
        licenses: &[License],
        termination: &TerminationRecord,
        archived_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let snapshot = serde_json::json!({
            "agent": serde_json::to_value(agent)?,
            "licenses": serde_json::to_value(licenses)?,
            "termination": serde_json::to_value(termination)?,
        });
        let retention_until = archived_at
            .checked_add_months(Months::new(RETENTION_YEARS * 12))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Self {
            id: ArchiveId::new(),
            agent_id: agent.id,
            termination_id: termination.id,
            snapshot,
            archived_at,
            retention_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_retention_is_seven_years() {
        let agent = Agent::new("Luis Ortega", "luis@example.org");
        let termination = TerminationRecord::new(
            agent.id,
            "Contract ended",
            "END",
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            "ops",
            Utc::now(),
        );
        let at = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();

        let archive = DataArchive::capture(&agent, &[], &termination, at).unwrap();
        assert_eq!(archive.retention_until, Utc.with_ymd_and_hms(2032, 2, 1, 8, 0, 0).unwrap());
        assert_eq!(archive.snapshot["agent"]["name"], "Luis Ortega");
        assert!(archive.snapshot["licenses"].as_array().unwrap().is_empty());
    }
}
