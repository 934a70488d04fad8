// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent-level status. `Inactive` is set by the expiry sweep once an agent
/// holds no license in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Active,
    Inactive,
    Suspended,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "ACTIVE",
            AgentStatus::Inactive => "INACTIVE",
            AgentStatus::Suspended => "SUSPENDED",
            AgentStatus::Terminated => "TERMINATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AgentStatus::Active),
            "INACTIVE" => Some(AgentStatus::Inactive),
            "SUSPENDED" => Some(AgentStatus::Suspended),
            "TERMINATED" => Some(AgentStatus::Terminated),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Termination details carried on the agent while it is terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationDetails {
    pub reason: String,
    pub reason_code: String,
    pub effective_date: NaiveDate,
    pub terminated_at: DateTime<Utc>,
}

/// The slice of the agent profile this engine reads and mutates.
///
/// Address, bank and contact CRUD live elsewhere; only the fields touched by
/// termination, reinstatement and the expiry sweep are modelled here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub email: String,
    pub status: AgentStatus,
    pub commission_enabled: bool,
    pub portal_access_enabled: bool,
    pub termination: Option<TerminationDetails>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            email: email.into(),
            status: AgentStatus::Active,
            commission_enabled: true,
            portal_access_enabled: true,
            termination: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status == AgentStatus::Terminated
    }

    /// Flip to TERMINATED. Portal and payout flags are left to the
    /// termination process steps.
    pub fn terminate(&mut self, details: TerminationDetails) {
        self.updated_at = details.terminated_at;
        self.status = AgentStatus::Terminated;
        self.termination = Some(details);
        self.version += 1;
    }

    /// Restore to ACTIVE after an approved reinstatement.
    pub fn reinstate(&mut self, at: DateTime<Utc>) {
        self.status = AgentStatus::Active;
        self.commission_enabled = true;
        self.termination = None;
        self.updated_at = at;
        self.version += 1;
    }

    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.status = AgentStatus::Inactive;
        self.updated_at = at;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_then_reinstate_clears_fields() {
        let mut agent = Agent::new("Ana Ruiz", "ana@example.org");
        agent.commission_enabled = false;
        agent.terminate(TerminationDetails {
            reason: "Repeated compliance breaches".to_string(),
            reason_code: "COMPLIANCE".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            terminated_at: Utc::now(),
        });
        assert!(agent.is_terminated());
        assert_eq!(agent.version, 1);

        agent.reinstate(Utc::now());
        assert_eq!(agent.status, AgentStatus::Active);
        assert!(agent.commission_enabled);
        assert!(agent.termination.is_none());
        assert_eq!(agent.version, 2);
    }

    #[test]
    fn test_status_parse() {
        for status in [
            AgentStatus::Active,
            AgentStatus::Inactive,
            AgentStatus::Suspended,
            AgentStatus::Terminated,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("retired"), None);
    }
}
