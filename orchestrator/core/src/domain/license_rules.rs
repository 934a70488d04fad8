// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # License Rule Engine
//!
//! Pure decision logic for license transitions. Given a license, a requested
//! [`LicenseAction`] and a [`DecisionContext`] carrying the caller's notion of
//! "today", [`LicenseRuleEngine::decide`] returns either an approved
//! [`Transition`] (the full resulting state plus the version it was computed
//! against) or a typed [`DenialReason`].
//!
//! The engine never reads a clock and never performs I/O. Persisting an
//! approved transition is the License Record Store's job, which rejects it
//! with a conflict if the license version moved in the meantime.
//!
//! ## Rules
//!
//! | Action | Allowed when | Result |
//! |--------|--------------|--------|
//! | `Renew` | status not EXPIRED/SUSPENDED/TERMINATED; provisional: count < 2 and (exam passed or within 3 years of issue) | renewal date = today + 1 year, count + 1, ACTIVE |
//! | `ConvertToPermanent` | provisional, exam passed, exam date within 3 years of issue | PERMANENT, renewal date = exam date + 5 years, ACTIVE |
//! | `RecordExam` | license not TERMINATED | exam fields updated |
//! | `Suspend` | license in force | SUSPENDED |
//! | `MarkExpired` | ACTIVE and `is_expired` | EXPIRED |

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::license::{License, LicenseId, LicenseState, LicenseStatus, LicenseType};

pub const MAX_PROVISIONAL_RENEWALS: u32 = 2;
pub const CONVERSION_WINDOW_YEARS: u32 = 3;
pub const PERMANENT_TERM_YEARS: u32 = 5;
pub const RENEWAL_TERM_YEARS: u32 = 1;

/// A transition requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LicenseAction {
    Renew,
    ConvertToPermanent {
        exam_date: NaiveDate,
        certificate_number: String,
    },
    RecordExam {
        exam_date: NaiveDate,
        passed: bool,
        certificate_number: Option<String>,
    },
    Suspend {
        reason: String,
    },
    MarkExpired,
}

impl LicenseAction {
    pub fn name(&self) -> &'static str {
        match self {
            LicenseAction::Renew => "RENEW",
            LicenseAction::ConvertToPermanent { .. } => "CONVERT_TO_PERMANENT",
            LicenseAction::RecordExam { .. } => "RECORD_EXAM",
            LicenseAction::Suspend { .. } => "SUSPEND",
            LicenseAction::MarkExpired => "MARK_EXPIRED",
        }
    }
}

/// Inputs the engine needs from the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionContext {
    pub today: NaiveDate,
}

impl DecisionContext {
    pub fn on(today: NaiveDate) -> Self {
        Self { today }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DenialReason {
    #[error("License is {status} and cannot be renewed")]
    NotRenewable { status: LicenseStatus },

    #[error("Provisional license reached the maximum of {max} renewals; it must be converted to permanent")]
    MaxProvisionalRenewals { max: u32 },

    #[error("Conversion window closed: more than {years} years since issue on {issue_date} and the exam has not been passed")]
    ConversionWindowClosed { issue_date: NaiveDate, years: u32 },

    #[error("Only provisional licenses can be converted (license is {license_type:?})")]
    NotProvisional { license_type: LicenseType },

    #[error("Exam has not been passed")]
    ExamNotPassed,

    #[error("Exam date {exam_date} is after the conversion deadline {deadline}")]
    ExamOutsideConversionWindow { exam_date: NaiveDate, deadline: NaiveDate },

    #[error("Exam date {exam_date} precedes the issue date {issue_date}")]
    ExamBeforeIssue { exam_date: NaiveDate, issue_date: NaiveDate },

    #[error("A certificate number is required")]
    MissingCertificateNumber,

    #[error("License is not expired (renewal date {renewal_date})")]
    NotExpired { renewal_date: NaiveDate },

    #[error("Action {action} is not allowed from status {status}")]
    InvalidTransition { action: String, status: LicenseStatus },

    #[error("Date arithmetic overflow")]
    DateOverflow,
}

/// An approved change, computed against `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub license_id: LicenseId,
    pub expected_version: u64,
    pub action: String,
    pub old_state: LicenseState,
    pub new_state: LicenseState,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Transition),
    Deny(DenialReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn into_result(self) -> Result<Transition, DenialReason> {
        match self {
            Decision::Allow(t) => Ok(t),
            Decision::Deny(r) => Err(r),
        }
    }
}

fn add_years(date: NaiveDate, years: u32) -> Result<NaiveDate, DenialReason> {
    date.checked_add_months(Months::new(years * 12))
        .ok_or(DenialReason::DateOverflow)
}

/// Stateless rule engine. All methods are associated functions; the struct
/// exists so call sites read as `LicenseRuleEngine::decide(..)`.
pub struct LicenseRuleEngine;

impl LicenseRuleEngine {
    pub fn decide(license: &License, action: &LicenseAction, ctx: DecisionContext) -> Decision {
        let outcome = match action {
            LicenseAction::Renew => Self::renew(license, ctx.today)
                .map(|state| (state, "License renewed".to_string())),
            LicenseAction::ConvertToPermanent { exam_date, certificate_number } => {
                Self::convert_to_permanent(license, *exam_date, certificate_number)
                    .map(|state| (state, "Converted to permanent after exam".to_string()))
            }
            LicenseAction::RecordExam { exam_date, passed, certificate_number } => {
                Self::record_exam(license, *exam_date, *passed, certificate_number.clone())
                    .map(|state| (state, format!("Exam recorded (passed: {})", passed)))
            }
            LicenseAction::Suspend { reason } => {
                Self::suspend(license).map(|state| (state, reason.clone()))
            }
            LicenseAction::MarkExpired => Self::mark_expired(license, ctx.today).map(|state| {
                (state, format!("Renewal date {} passed", license.renewal_date()))
            }),
        };

        match outcome {
            Ok((new_state, reason)) => Decision::Allow(Transition {
                license_id: license.id,
                expected_version: license.version,
                action: action.name().to_string(),
                old_state: license.state.clone(),
                new_state,
                reason,
            }),
            Err(reason) => Decision::Deny(reason),
        }
    }

    /// Eligibility check for renewal.
    pub fn can_renew(license: &License, today: NaiveDate) -> Result<(), DenialReason> {
        let state = &license.state;
        match state.status {
            LicenseStatus::Expired | LicenseStatus::Suspended | LicenseStatus::Terminated => {
                return Err(DenialReason::NotRenewable { status: state.status });
            }
            LicenseStatus::Active | LicenseStatus::Renewed => {}
        }

        if state.license_type == LicenseType::Provisional {
            if state.renewal_count >= MAX_PROVISIONAL_RENEWALS {
                return Err(DenialReason::MaxProvisionalRenewals {
                    max: MAX_PROVISIONAL_RENEWALS,
                });
            }
            let window_end = add_years(license.issue_date, CONVERSION_WINDOW_YEARS)?;
            if today > window_end && !state.exam_passed {
                return Err(DenialReason::ConversionWindowClosed {
                    issue_date: license.issue_date,
                    years: CONVERSION_WINDOW_YEARS,
                });
            }
        }
        Ok(())
    }

    /// Resulting state of a renewal on `today`. The license goes back to
    /// ACTIVE so the sweep picks it up again once the new term lapses.
    pub fn renew(license: &License, today: NaiveDate) -> Result<LicenseState, DenialReason> {
        Self::can_renew(license, today)?;
        let mut next = license.state.clone();
        next.renewal_date = add_years(today, RENEWAL_TERM_YEARS)?;
        next.renewal_count += 1;
        next.status = LicenseStatus::Active;
        Ok(next)
    }

    pub fn convert_to_permanent(
        license: &License,
        exam_date: NaiveDate,
        certificate_number: &str,
    ) -> Result<LicenseState, DenialReason> {
        let state = &license.state;
        if state.license_type != LicenseType::Provisional {
            return Err(DenialReason::NotProvisional {
                license_type: state.license_type,
            });
        }
        if !state.status.is_in_force() {
            return Err(DenialReason::InvalidTransition {
                action: "CONVERT_TO_PERMANENT".to_string(),
                status: state.status,
            });
        }
        if !state.exam_passed {
            return Err(DenialReason::ExamNotPassed);
        }
        if certificate_number.trim().is_empty() {
            return Err(DenialReason::MissingCertificateNumber);
        }
        if exam_date < license.issue_date {
            return Err(DenialReason::ExamBeforeIssue {
                exam_date,
                issue_date: license.issue_date,
            });
        }
        let deadline = add_years(license.issue_date, CONVERSION_WINDOW_YEARS)?;
        if exam_date > deadline {
            return Err(DenialReason::ExamOutsideConversionWindow { exam_date, deadline });
        }

        let mut next = state.clone();
        next.license_type = LicenseType::Permanent;
        next.renewal_date = add_years(exam_date, PERMANENT_TERM_YEARS)?;
        next.status = LicenseStatus::Active;
        next.exam_date = Some(exam_date);
        next.certificate_number = Some(certificate_number.trim().to_string());
        Ok(next)
    }

    fn record_exam(
        license: &License,
        exam_date: NaiveDate,
        passed: bool,
        certificate_number: Option<String>,
    ) -> Result<LicenseState, DenialReason> {
        let state = &license.state;
        if state.status == LicenseStatus::Terminated {
            return Err(DenialReason::InvalidTransition {
                action: "RECORD_EXAM".to_string(),
                status: state.status,
            });
        }
        if exam_date < license.issue_date {
            return Err(DenialReason::ExamBeforeIssue {
                exam_date,
                issue_date: license.issue_date,
            });
        }
        let certificate_number = certificate_number
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if passed && certificate_number.is_none() {
            return Err(DenialReason::MissingCertificateNumber);
        }

        let mut next = state.clone();
        next.exam_passed = passed;
        next.exam_date = Some(exam_date);
        next.certificate_number = certificate_number;
        Ok(next)
    }

    fn suspend(license: &License) -> Result<LicenseState, DenialReason> {
        if !license.state.status.is_in_force() {
            return Err(DenialReason::InvalidTransition {
                action: "SUSPEND".to_string(),
                status: license.state.status,
            });
        }
        let mut next = license.state.clone();
        next.status = LicenseStatus::Suspended;
        Ok(next)
    }

    fn mark_expired(license: &License, today: NaiveDate) -> Result<LicenseState, DenialReason> {
        if license.state.status != LicenseStatus::Active {
            return Err(DenialReason::InvalidTransition {
                action: "MARK_EXPIRED".to_string(),
                status: license.state.status,
            });
        }
        if !Self::is_expired(license, today) {
            return Err(DenialReason::NotExpired {
                renewal_date: license.state.renewal_date,
            });
        }
        let mut next = license.state.clone();
        next.status = LicenseStatus::Expired;
        Ok(next)
    }

    /// `today > renewal_date AND status ≠ RENEWED`.
    pub fn is_expired(license: &License, today: NaiveDate) -> bool {
        today > license.state.renewal_date && license.state.status != LicenseStatus::Renewed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn provisional(issue: NaiveDate, renewal: NaiveDate) -> License {
        License::issue(AgentId::new(), "LIFE", "LIC-42", LicenseType::Provisional, issue, renewal)
    }

    fn apply(license: &mut License, action: LicenseAction, today: NaiveDate) -> Result<(), DenialReason> {
        let transition = LicenseRuleEngine::decide(license, &action, DecisionContext::on(today))
            .into_result()?;
        license.state = transition.new_state;
        license.version += 1;
        Ok(())
    }

    #[test]
    fn test_provisional_with_two_renewals_is_denied() {
        let mut license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        license.state.renewal_count = 2;

        let result = LicenseRuleEngine::can_renew(&license, date(2024, 1, 1));
        assert_eq!(result, Err(DenialReason::MaxProvisionalRenewals { max: 2 }));
        assert!(result.unwrap_err().to_string().contains("maximum of 2 renewals"));
    }

    #[test]
    fn test_renew_adds_one_year_and_increments_count() {
        let license = provisional(date(2021, 6, 1), date(2022, 6, 1));
        let today = date(2022, 5, 20);

        let next = LicenseRuleEngine::renew(&license, today).unwrap();
        assert_eq!(next.renewal_date, today + chrono::Duration::days(365));
        assert_eq!(next.renewal_count, license.renewal_count() + 1);
        assert_eq!(next.status, LicenseStatus::Active);
    }

    #[test]
    fn test_renew_uses_calendar_year_across_leap_day() {
        let license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        let next = LicenseRuleEngine::renew(&license, date(2024, 1, 1)).unwrap();
        assert_eq!(next.renewal_date, date(2025, 1, 1));
    }

    #[test]
    fn test_denied_statuses_cannot_renew() {
        for status in [LicenseStatus::Expired, LicenseStatus::Suspended, LicenseStatus::Terminated] {
            let mut license = provisional(date(2023, 1, 1), date(2024, 1, 1));
            license.state.status = status;
            assert_eq!(
                LicenseRuleEngine::can_renew(&license, date(2023, 12, 1)),
                Err(DenialReason::NotRenewable { status })
            );
        }
    }

    #[test]
    fn test_conversion_window_closed_without_exam() {
        let mut license = provisional(date(2020, 1, 1), date(2023, 6, 1));
        license.state.renewal_count = 1;
        let today = date(2023, 1, 2);

        assert!(matches!(
            LicenseRuleEngine::can_renew(&license, today),
            Err(DenialReason::ConversionWindowClosed { .. })
        ));

        license.state.exam_passed = true;
        assert!(LicenseRuleEngine::can_renew(&license, today).is_ok());
    }

    #[test]
    fn test_permanent_license_has_no_renewal_cap() {
        let mut license = provisional(date(2015, 1, 1), date(2024, 1, 1));
        license.state.license_type = LicenseType::Permanent;
        license.state.renewal_count = 7;
        assert!(LicenseRuleEngine::can_renew(&license, date(2023, 12, 1)).is_ok());
    }

    #[test]
    fn test_convert_denied_when_exam_after_three_years() {
        let mut license = provisional(date(2020, 1, 1), date(2023, 6, 1));
        license.state.exam_passed = true;

        let result = LicenseRuleEngine::convert_to_permanent(&license, date(2023, 1, 2), "CERT-9");
        assert_eq!(
            result,
            Err(DenialReason::ExamOutsideConversionWindow {
                exam_date: date(2023, 1, 2),
                deadline: date(2023, 1, 1),
            })
        );
    }

    #[test]
    fn test_convert_sets_permanent_five_years_from_exam() {
        let mut license = provisional(date(2021, 3, 1), date(2022, 3, 1));
        license.state.exam_passed = true;

        let next = LicenseRuleEngine::convert_to_permanent(&license, date(2022, 2, 10), "CERT-77").unwrap();
        assert_eq!(next.license_type, LicenseType::Permanent);
        assert_eq!(next.renewal_date, date(2027, 2, 10));
        assert_eq!(next.status, LicenseStatus::Active);
        assert_eq!(next.certificate_number.as_deref(), Some("CERT-77"));
    }

    #[test]
    fn test_convert_requires_passed_exam_and_provisional() {
        let license = provisional(date(2021, 3, 1), date(2022, 3, 1));
        assert_eq!(
            LicenseRuleEngine::convert_to_permanent(&license, date(2022, 2, 10), "C"),
            Err(DenialReason::ExamNotPassed)
        );

        let mut permanent = license.clone();
        permanent.state.license_type = LicenseType::Permanent;
        assert!(matches!(
            LicenseRuleEngine::convert_to_permanent(&permanent, date(2022, 2, 10), "C"),
            Err(DenialReason::NotProvisional { .. })
        ));
    }

    #[test]
    fn test_is_expired_boundaries() {
        let license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        assert!(!LicenseRuleEngine::is_expired(&license, date(2024, 1, 1)));
        assert!(LicenseRuleEngine::is_expired(&license, date(2024, 1, 2)));

        let renewed_state = LicenseRuleEngine::renew(&license, date(2023, 12, 30)).unwrap();
        let mut renewed = license.clone();
        renewed.state = renewed_state;
        assert!(!LicenseRuleEngine::is_expired(&renewed, date(2024, 1, 2)));
        assert!(!LicenseRuleEngine::is_expired(&renewed, date(2024, 12, 30)));
        assert!(LicenseRuleEngine::is_expired(&renewed, date(2024, 12, 31)));
    }

    #[test]
    fn test_renewed_license_can_be_marked_expired_after_new_term() {
        let mut license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        apply(&mut license, LicenseAction::Renew, date(2024, 1, 1)).unwrap();

        let ctx = DecisionContext::on(date(2030, 1, 1));
        let transition = LicenseRuleEngine::decide(&license, &LicenseAction::MarkExpired, ctx)
            .into_result()
            .unwrap();
        assert_eq!(transition.old_state.status, LicenseStatus::Active);
        assert_eq!(transition.new_state.status, LicenseStatus::Expired);
    }

    #[test]
    fn test_mark_expired_only_for_active_past_due() {
        let license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        let ctx = DecisionContext::on(date(2023, 12, 31));
        assert!(matches!(
            LicenseRuleEngine::decide(&license, &LicenseAction::MarkExpired, ctx),
            Decision::Deny(DenialReason::NotExpired { .. })
        ));

        let ctx = DecisionContext::on(date(2024, 2, 1));
        match LicenseRuleEngine::decide(&license, &LicenseAction::MarkExpired, ctx) {
            Decision::Allow(t) => {
                assert_eq!(t.new_state.status, LicenseStatus::Expired);
                assert_eq!(t.expected_version, 0);
                assert_eq!(t.action, "MARK_EXPIRED");
            }
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[test]
    fn test_record_exam_requires_certificate_when_passed() {
        let license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        let action = LicenseAction::RecordExam {
            exam_date: date(2023, 8, 1),
            passed: true,
            certificate_number: Some("  ".to_string()),
        };
        assert_eq!(
            LicenseRuleEngine::decide(&license, &action, DecisionContext::on(date(2023, 8, 2))),
            Decision::Deny(DenialReason::MissingCertificateNumber)
        );
    }

    #[test]
    fn test_renewal_scenario_from_2023() {
        let mut license = provisional(date(2023, 1, 1), date(2024, 1, 1));

        apply(&mut license, LicenseAction::Renew, date(2024, 1, 1)).unwrap();
        assert_eq!(license.renewal_date(), date(2025, 1, 1));
        assert_eq!(license.renewal_count(), 1);
        assert_eq!(license.status(), LicenseStatus::Active);

        apply(&mut license, LicenseAction::Renew, date(2025, 1, 1)).unwrap();
        assert_eq!(license.renewal_count(), 2);

        let third = apply(&mut license, LicenseAction::Renew, date(2025, 6, 1));
        assert_eq!(third, Err(DenialReason::MaxProvisionalRenewals { max: 2 }));
        assert_eq!(license.renewal_count(), 2);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let license = provisional(date(2023, 1, 1), date(2024, 1, 1));
        let ctx = DecisionContext::on(date(2023, 11, 15));
        let a = LicenseRuleEngine::decide(&license, &LicenseAction::Renew, ctx);
        let b = LicenseRuleEngine::decide(&license, &LicenseAction::Renew, ctx);
        assert_eq!(a, b);
    }
}
