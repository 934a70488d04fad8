// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! License Service
//!
//! Synchronous license operations: load the license, ask the rule engine,
//! persist the approved transition with its audit entry, publish the event.
//!
//! # Architecture
//!
//! - **Layer:** Application
//! - **Purpose:** Use cases over the License Record Store
//! - **Collaborators:** `LicenseRuleEngine` (decision), `LicenseRepository`
//!   (atomic write), `EventBus` (notification of committed changes)
//!
//! The service reads today's date from its [`Clock`]; the engine never does.
//! A concurrent writer between load and write surfaces as
//! [`LicenseServiceError::Conflict`]; callers decide whether to reload and
//! retry.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::clock::Clock;
use crate::domain::collaborators::{Notification, NotificationKind, NotificationService};
use crate::domain::events::LicenseEvent;
use crate::domain::license::{AuditEntry, License, LicenseId, LicenseType};
use crate::domain::license_rules::{DecisionContext, DenialReason, LicenseAction, LicenseRuleEngine};
use crate::domain::reminder::{Reminder, ReminderScheduler};
use crate::domain::repository::{AgentRepository, LicenseRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum LicenseServiceError {
    #[error("License {0} not found")]
    NotFound(LicenseId),

    #[error("Agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("Transition denied: {0}")]
    Denied(#[from] DenialReason),

    #[error("License changed concurrently: {0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LicenseServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => LicenseServiceError::Conflict(msg),
            other => LicenseServiceError::Repository(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssueLicenseRequest {
    pub agent_id: AgentId,
    pub line: String,
    pub license_number: String,
    pub license_type: LicenseType,
    pub issue_date: NaiveDate,
    pub renewal_date: NaiveDate,
    pub primary: bool,
}

/// A reminder that falls due today, with enough context to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub license: License,
    pub reminder: Reminder,
}

pub struct LicenseService {
    licenses: Arc<dyn LicenseRepository>,
    agents: Arc<dyn AgentRepository>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    reminders: ReminderScheduler,
}

impl LicenseService {
    pub fn new(
        licenses: Arc<dyn LicenseRepository>,
        agents: Arc<dyn AgentRepository>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        reminders: ReminderScheduler,
    ) -> Self {
        Self {
            licenses,
            agents,
            clock,
            event_bus,
            reminders,
        }
    }

    pub async fn issue(&self, request: IssueLicenseRequest) -> Result<License, LicenseServiceError> {
        if self.agents.get(request.agent_id).await?.is_none() {
            return Err(LicenseServiceError::AgentNotFound(request.agent_id));
        }

        let mut license = License::issue(
            request.agent_id,
            request.line,
            request.license_number,
            request.license_type,
            request.issue_date,
            request.renewal_date,
        );
        if request.primary {
            license = license.primary();
        }
        self.licenses.insert(&license).await?;

        info!(
            license_id = %license.id,
            agent_id = %license.agent_id,
            license_number = %license.license_number,
            "License issued"
        );
        Ok(license)
    }

    pub async fn get(&self, id: LicenseId) -> Result<License, LicenseServiceError> {
        self.licenses
            .get(id)
            .await?
            .ok_or(LicenseServiceError::NotFound(id))
    }

    pub async fn licenses_for_agent(&self, agent_id: AgentId) -> Result<Vec<License>, LicenseServiceError> {
        Ok(self.licenses.find_by_agent(agent_id).await?)
    }

    /// Decide and persist one action against the current state of the license.
    pub async fn apply(
        &self,
        id: LicenseId,
        action: LicenseAction,
        actor: &str,
    ) -> Result<License, LicenseServiceError> {
        let license = self.get(id).await?;
        let today = self.clock.today();

        let transition = match LicenseRuleEngine::decide(&license, &action, DecisionContext::on(today))
            .into_result()
        {
            Ok(t) => t,
            Err(reason) => {
                debug!(license_id = %id, action = action.name(), reason = %reason, "Transition denied");
                metrics::counter!("lifecycle_license_denials_total", "action" => action.name())
                    .increment(1);
                return Err(reason.into());
            }
        };

        let now = self.clock.now();
        let updated = match self.licenses.apply_transition(&transition, actor, now).await {
            Ok(l) => l,
            Err(e) => {
                warn!(license_id = %id, action = action.name(), error = %e, "Failed to persist transition");
                return Err(e.into());
            }
        };

        info!(
            license_id = %id,
            agent_id = %updated.agent_id,
            action = action.name(),
            from = %transition.old_state.status,
            to = %transition.new_state.status,
            actor,
            "License transitioned"
        );
        metrics::counter!("lifecycle_license_transitions_total", "action" => action.name()).increment(1);

        self.event_bus.publish_license_event(LicenseEvent::LicenseTransitioned {
            license_id: id,
            agent_id: updated.agent_id,
            action: transition.action.clone(),
            from: transition.old_state.status,
            to: transition.new_state.status,
            actor: actor.to_string(),
            transitioned_at: now,
        });

        Ok(updated)
    }

    pub async fn renew(&self, id: LicenseId, actor: &str) -> Result<License, LicenseServiceError> {
        self.apply(id, LicenseAction::Renew, actor).await
    }

    pub async fn convert_to_permanent(
        &self,
        id: LicenseId,
        exam_date: NaiveDate,
        certificate_number: String,
        actor: &str,
    ) -> Result<License, LicenseServiceError> {
        self.apply(
            id,
            LicenseAction::ConvertToPermanent {
                exam_date,
                certificate_number,
            },
            actor,
        )
        .await
    }

    pub async fn record_exam(
        &self,
        id: LicenseId,
        exam_date: NaiveDate,
        passed: bool,
        certificate_number: Option<String>,
        actor: &str,
    ) -> Result<License, LicenseServiceError> {
        self.apply(
            id,
            LicenseAction::RecordExam {
                exam_date,
                passed,
                certificate_number,
            },
            actor,
        )
        .await
    }

    pub async fn suspend(&self, id: LicenseId, reason: String, actor: &str) -> Result<License, LicenseServiceError> {
        self.apply(id, LicenseAction::Suspend { reason }, actor).await
    }

    pub async fn reminders(&self, id: LicenseId) -> Result<Vec<Reminder>, LicenseServiceError> {
        let license = self.get(id).await?;
        Ok(self.reminders.schedule(&license))
    }

    pub async fn audit_trail(&self, id: LicenseId) -> Result<Vec<AuditEntry>, LicenseServiceError> {
        // Distinguish "no such license" from "no entries yet"
        self.get(id).await?;
        Ok(self.licenses.audit_trail(id).await?)
    }

    /// Reminders falling on `today` across every license in force.
    pub async fn due_reminders(&self, today: NaiveDate) -> Result<Vec<DueReminder>, LicenseServiceError> {
        let mut due = Vec::new();
        for status in [
            crate::domain::license::LicenseStatus::Active,
            crate::domain::license::LicenseStatus::Renewed,
        ] {
            for license in self.licenses.find_by_status(status).await? {
                for reminder in self.reminders.due_on(&license, today) {
                    due.push(DueReminder {
                        license: license.clone(),
                        reminder,
                    });
                }
            }
        }
        Ok(due)
    }

    /// Send today's reminders. Delivery is best-effort: failures are logged
    /// and counted, never raised. Returns the number sent.
    pub async fn send_due_reminders(
        &self,
        notifications: &dyn NotificationService,
        today: NaiveDate,
    ) -> Result<usize, LicenseServiceError> {
        let mut sent = 0;
        for due in self.due_reminders(today).await? {
            let Some(agent) = self.agents.get(due.license.agent_id).await? else {
                warn!(license_id = %due.license.id, "Reminder skipped: agent not found");
                continue;
            };
            let notification = Notification {
                kind: NotificationKind::RenewalReminder,
                recipient: agent.email.clone(),
                subject: format!("License {} renewal due {}", due.license.license_number, due.license.renewal_date()),
                body: match due.reminder.offset_days {
                    0 => format!(
                        "Your {} license {} is due for renewal today.",
                        due.license.line, due.license.license_number
                    ),
                    days => format!(
                        "Your {} license {} is due for renewal in {} days, on {}.",
                        due.license.line,
                        due.license.license_number,
                        days,
                        due.license.renewal_date()
                    ),
                },
                agent_id: agent.id,
            };

            match notifications.send(&notification).await {
                Ok(()) => {
                    sent += 1;
                    metrics::counter!("lifecycle_reminders_sent_total").increment(1);
                }
                Err(e) => {
                    warn!(license_id = %due.license.id, error = %e, "Failed to send renewal reminder");
                    metrics::counter!("lifecycle_reminders_failed_total").increment(1);
                }
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::Agent;
    use crate::domain::clock::ManualClock;
    use crate::domain::license::LicenseStatus;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::repositories::InMemoryLifecycleStore;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup(today: NaiveDate) -> (LicenseService, Arc<ManualClock>, EventBus, License) {
        let store = Arc::new(InMemoryLifecycleStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.from_utc_datetime(&today.and_hms_opt(9, 0, 0).unwrap()),
        ));
        let bus = EventBus::with_default_capacity();
        let agent = Agent::new("Rosa Lindqvist", "rosa@example.com");
        AgentRepository::save(store.as_ref(), &agent).await.unwrap();

        let service = LicenseService::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            bus.clone(),
            ReminderScheduler::default(),
        );
        let license = service
            .issue(IssueLicenseRequest {
                agent_id: agent.id,
                line: "LIFE".to_string(),
                license_number: "PL-2031".to_string(),
                license_type: LicenseType::Provisional,
                issue_date: date(2023, 1, 1),
                renewal_date: date(2024, 1, 1),
                primary: true,
            })
            .await
            .unwrap();
        (service, clock, bus, license)
    }

    #[tokio::test]
    async fn test_renew_persists_and_publishes() {
        let (service, _clock, bus, license) = setup(date(2023, 12, 15)).await;
        let mut events = bus.subscribe();

        let renewed = service.renew(license.id, "ops.user").await.unwrap();
        assert_eq!(renewed.status(), LicenseStatus::Active);
        assert_eq!(renewed.renewal_date(), date(2024, 12, 15));
        assert_eq!(renewed.version, license.version + 1);

        let trail = service.audit_trail(license.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, "RENEW");
        assert_eq!(trail[0].actor, "ops.user");

        match events.try_recv().unwrap() {
            DomainEvent::License(LicenseEvent::LicenseTransitioned { to, .. }) => {
                assert_eq!(to, LicenseStatus::Active)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_denial_leaves_license_untouched() {
        let (service, clock, _bus, license) = setup(date(2023, 6, 1)).await;
        service.renew(license.id, "ops").await.unwrap();
        service.renew(license.id, "ops").await.unwrap();

        clock.advance(chrono::Duration::days(30));
        let err = service.renew(license.id, "ops").await.unwrap_err();
        assert!(matches!(
            err,
            LicenseServiceError::Denied(DenialReason::MaxProvisionalRenewals { max: 2 })
        ));
        assert_eq!(service.get(license.id).await.unwrap().renewal_count(), 2);
        assert_eq!(service.audit_trail(license.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_license_is_not_found() {
        let (service, _clock, _bus, _license) = setup(date(2023, 6, 1)).await;
        let id = LicenseId::new();
        assert!(matches!(
            service.renew(id, "ops").await,
            Err(LicenseServiceError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_due_reminders_on_offset_days() {
        let (service, _clock, _bus, license) = setup(date(2023, 12, 2)).await;

        let due = service.due_reminders(date(2023, 12, 2)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].license.id, license.id);
        assert_eq!(due[0].reminder.offset_days, 30);

        assert!(service.due_reminders(date(2023, 12, 3)).await.unwrap().is_empty());

        let schedule = service.reminders(license.id).await.unwrap();
        let offsets: Vec<u32> = schedule.iter().map(|r| r.offset_days).collect();
        assert_eq!(offsets, vec![30, 15, 7, 0]);
    }
}
