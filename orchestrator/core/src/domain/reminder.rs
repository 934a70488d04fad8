// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Renewal reminder calendar.
//!
//! Pure computation over a renewal date. Whether a reminder was sent is owned
//! by the notification subsystem; when a renewal date changes the caller
//! discards the old calendar and asks for a new one.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::license::License;

pub const DEFAULT_REMINDER_OFFSETS: [u32; 4] = [30, 15, 7, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub offset_days: u32,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderScheduler {
    offsets: Vec<u32>,
}

impl ReminderScheduler {
    /// Offsets are kept in descending order so the calendar reads earliest
    /// reminder first.
    pub fn new(offsets: impl IntoIterator<Item = u32>) -> Self {
        let mut offsets: Vec<u32> = offsets.into_iter().collect();
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        offsets.dedup();
        Self { offsets }
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Reminders that would fall before the earliest representable date are
    /// left out.
    pub fn schedule_for_date(&self, renewal_date: NaiveDate) -> Vec<Reminder> {
        self.offsets
            .iter()
            .filter_map(|&offset_days| {
                renewal_date
                    .checked_sub_days(Days::new(u64::from(offset_days)))
                    .map(|date| Reminder { offset_days, date })
            })
            .collect()
    }

    pub fn schedule(&self, license: &License) -> Vec<Reminder> {
        self.schedule_for_date(license.renewal_date())
    }

    /// Reminders falling exactly on `today`. Licenses that are no longer in
    /// force get none.
    pub fn due_on(&self, license: &License, today: NaiveDate) -> Vec<Reminder> {
        if !license.status().is_in_force() {
            return Vec::new();
        }
        self.schedule(license)
            .into_iter()
            .filter(|r| r.date == today)
            .collect()
    }
}

impl Default for ReminderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REMINDER_OFFSETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::license::{LicenseStatus, LicenseType};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn license_due(renewal: NaiveDate) -> License {
        License::issue(AgentId::new(), "LIFE", "LIC-7", LicenseType::Permanent, date(2020, 1, 1), renewal)
    }

    #[test]
    fn test_default_calendar() {
        let schedule = ReminderScheduler::default().schedule(&license_due(date(2025, 3, 31)));
        assert_eq!(
            schedule,
            vec![
                Reminder { offset_days: 30, date: date(2025, 3, 1) },
                Reminder { offset_days: 15, date: date(2025, 3, 16) },
                Reminder { offset_days: 7, date: date(2025, 3, 24) },
                Reminder { offset_days: 0, date: date(2025, 3, 31) },
            ]
        );
    }

    #[test]
    fn test_recomputes_identically() {
        let scheduler = ReminderScheduler::default();
        let license = license_due(date(2026, 1, 10));
        assert_eq!(scheduler.schedule(&license), scheduler.schedule(&license));
    }

    #[test]
    fn test_calendar_near_min_date_drops_unrepresentable_reminders() {
        let earliest = NaiveDate::MIN + Days::new(10);
        let schedule = ReminderScheduler::default().schedule_for_date(earliest);
        assert_eq!(
            schedule,
            vec![
                Reminder { offset_days: 7, date: NaiveDate::MIN + Days::new(3) },
                Reminder { offset_days: 0, date: earliest },
            ]
        );
    }

    #[test]
    fn test_custom_offsets_are_sorted_and_deduplicated() {
        let scheduler = ReminderScheduler::new([0, 60, 30, 30]);
        assert_eq!(scheduler.offsets(), &[60, 30, 0]);
    }

    #[test]
    fn test_due_on_skips_licenses_out_of_force() {
        let scheduler = ReminderScheduler::default();
        let mut license = license_due(date(2025, 6, 30));
        assert_eq!(scheduler.due_on(&license, date(2025, 6, 23)).len(), 1);

        license.state.status = LicenseStatus::Suspended;
        assert!(scheduler.due_on(&license, date(2025, 6, 23)).is_empty());
    }
}
