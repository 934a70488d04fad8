// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! License aggregate and its append-only audit trail.

use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LicenseId(pub Uuid);

impl LicenseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for LicenseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LicenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseType {
    Provisional,
    Permanent,
}

impl LicenseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseType::Provisional => "PROVISIONAL",
            LicenseType::Permanent => "PERMANENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROVISIONAL" => Some(LicenseType::Provisional),
            "PERMANENT" => Some(LicenseType::Permanent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    Active,
    Expired,
    Renewed,
    Suspended,
    Terminated,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "ACTIVE",
            LicenseStatus::Expired => "EXPIRED",
            LicenseStatus::Renewed => "RENEWED",
            LicenseStatus::Suspended => "SUSPENDED",
            LicenseStatus::Terminated => "TERMINATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(LicenseStatus::Active),
            "EXPIRED" => Some(LicenseStatus::Expired),
            "RENEWED" => Some(LicenseStatus::Renewed),
            "SUSPENDED" => Some(LicenseStatus::Suspended),
            "TERMINATED" => Some(LicenseStatus::Terminated),
            _ => None,
        }
    }

    /// A license in force allows the agent to keep selling.
    pub fn is_in_force(&self) -> bool {
        matches!(self, LicenseStatus::Active | LicenseStatus::Renewed)
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable part of a license. Every transition replaces this snapshot
/// as a whole and the audit trail stores the before/after pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseState {
    pub status: LicenseStatus,
    pub license_type: LicenseType,
    pub renewal_date: NaiveDate,
    pub renewal_count: u32,
    pub exam_passed: bool,
    pub exam_date: Option<NaiveDate>,
    pub certificate_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: LicenseId,
    pub agent_id: AgentId,
    /// Insurance line, e.g. `LIFE`.
    pub line: String,
    pub license_number: String,
    pub is_primary: bool,
    pub issue_date: NaiveDate,
    pub authority_date: NaiveDate,
    pub state: LicenseState,
    pub version: u64,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl License {
    /// Issue a new license. Provisional licenses start at renewal count 0.
    pub fn issue(
        agent_id: AgentId,
        line: impl Into<String>,
        license_number: impl Into<String>,
        license_type: LicenseType,
        issue_date: NaiveDate,
        renewal_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LicenseId::new(),
            agent_id,
            line: line.into(),
            license_number: license_number.into(),
            is_primary: false,
            issue_date,
            authority_date: issue_date,
            state: LicenseState {
                status: LicenseStatus::Active,
                license_type,
                renewal_date,
                renewal_count: 0,
                exam_passed: false,
                exam_date: None,
                certificate_number: None,
            },
            version: 0,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn status(&self) -> LicenseStatus {
        self.state.status
    }

    pub fn license_type(&self) -> LicenseType {
        self.state.license_type
    }

    pub fn renewal_date(&self) -> NaiveDate {
        self.state.renewal_date
    }

    pub fn renewal_count(&self) -> u32 {
        self.state.renewal_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditEntryId(pub Uuid);

impl AuditEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of the license audit log. Written in the same unit as the license
/// update it describes and never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub license_id: LicenseId,
    pub action: String,
    pub old_state: LicenseState,
    pub new_state: LicenseState,
    pub actor: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_starts_active_with_zero_renewals() {
        let license = License::issue(
            AgentId::new(),
            "LIFE",
            "LIC-0001",
            LicenseType::Provisional,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        assert_eq!(license.status(), LicenseStatus::Active);
        assert_eq!(license.renewal_count(), 0);
        assert_eq!(license.version, 0);
        assert!(!license.is_primary);
        assert!(license.primary().is_primary);
    }

    #[test]
    fn test_in_force_statuses() {
        assert!(LicenseStatus::Active.is_in_force());
        assert!(LicenseStatus::Renewed.is_in_force());
        assert!(!LicenseStatus::Expired.is_in_force());
        assert!(!LicenseStatus::Suspended.is_in_force());
        assert!(!LicenseStatus::Terminated.is_in_force());
    }
}
