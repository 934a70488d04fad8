// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! License commands
//!
//! Commands: issue, show, list, renew, convert, record-exam, suspend,
//! reminders, audit

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use lifecycle_core::application::license_service::{IssueLicenseRequest, LicenseServiceError};
use lifecycle_core::domain::agent::AgentId;
use lifecycle_core::domain::clock::Clock;
use lifecycle_core::domain::license::{License, LicenseId, LicenseType};

use super::parse_date;
use crate::embedded::LifecycleHost;

#[derive(Subcommand)]
pub enum LicenseCommand {
    /// Issue a new license to an agent
    Issue {
        #[arg(long, value_name = "AGENT_ID")]
        agent: Uuid,

        /// Insurance line, e.g. LIFE
        #[arg(long)]
        line: String,

        #[arg(long)]
        number: String,

        /// provisional or permanent
        #[arg(long, default_value = "provisional")]
        license_type: String,

        /// YYYY-MM-DD
        #[arg(long)]
        issue_date: String,

        /// YYYY-MM-DD
        #[arg(long)]
        renewal_date: String,

        #[arg(long)]
        primary: bool,
    },

    /// Show one license
    Show {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,
    },

    /// List an agent's licenses
    List {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,
    },

    /// Renew a license for one year from today
    Renew {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Convert a provisional license to permanent
    Convert {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,

        /// YYYY-MM-DD
        #[arg(long)]
        exam_date: String,

        #[arg(long)]
        certificate: String,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Record an exam result
    RecordExam {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,

        /// YYYY-MM-DD
        #[arg(long)]
        exam_date: String,

        #[arg(long)]
        passed: bool,

        #[arg(long)]
        certificate: Option<String>,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Suspend a license
    Suspend {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,

        #[arg(long)]
        reason: String,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Show the reminder calendar for a license
    Reminders {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,
    },

    /// Show the audit trail of a license
    Audit {
        #[arg(value_name = "LICENSE_ID")]
        license_id: Uuid,
    },
}

pub async fn handle_command(command: LicenseCommand, config_path: Option<PathBuf>) -> Result<()> {
    let host = LifecycleHost::new(config_path).await?;
    let licenses = &host.licenses;

    match command {
        LicenseCommand::Issue {
            agent,
            line,
            number,
            license_type,
            issue_date,
            renewal_date,
            primary,
        } => {
            let license_type = LicenseType::parse(&license_type.to_uppercase())
                .with_context(|| format!("Unknown license type '{}'", license_type))?;
            let license = licenses
                .issue(IssueLicenseRequest {
                    agent_id: AgentId(agent),
                    line,
                    license_number: number,
                    license_type,
                    issue_date: parse_date(&issue_date)?,
                    renewal_date: parse_date(&renewal_date)?,
                    primary,
                })
                .await?;
            println!("{}", format!("✓ License issued: {}", license.id.0).green());
            print_license(&license);
        }
        LicenseCommand::Show { license_id } => {
            print_license(&licenses.get(LicenseId(license_id)).await?);
        }
        LicenseCommand::List { agent_id } => {
            let found = licenses.licenses_for_agent(AgentId(agent_id)).await?;
            if found.is_empty() {
                println!("{}", "No licenses found".yellow());
                return Ok(());
            }
            println!(
                "{:<38} {:<8} {:<16} {:<12} {:<10} {}",
                "ID", "LINE", "NUMBER", "TYPE", "STATUS", "RENEWAL"
            );
            for license in found {
                println!(
                    "{:<38} {:<8} {:<16} {:<12} {:<10} {}",
                    license.id.0,
                    license.line,
                    license.license_number,
                    license.license_type().as_str(),
                    license.status(),
                    license.renewal_date()
                );
            }
        }
        LicenseCommand::Renew { license_id, actor } => {
            let renewed = report(licenses.renew(LicenseId(license_id), &actor).await)?;
            println!(
                "{}",
                format!(
                    "✓ Renewed until {} (renewal {})",
                    renewed.renewal_date(),
                    renewed.renewal_count()
                )
                .green()
            );
        }
        LicenseCommand::Convert {
            license_id,
            exam_date,
            certificate,
            actor,
        } => {
            let converted = report(
                licenses
                    .convert_to_permanent(LicenseId(license_id), parse_date(&exam_date)?, certificate, &actor)
                    .await,
            )?;
            println!(
                "{}",
                format!("✓ Converted to permanent, renewal due {}", converted.renewal_date()).green()
            );
        }
        LicenseCommand::RecordExam {
            license_id,
            exam_date,
            passed,
            certificate,
            actor,
        } => {
            report(
                licenses
                    .record_exam(LicenseId(license_id), parse_date(&exam_date)?, passed, certificate, &actor)
                    .await,
            )?;
            println!("{}", "✓ Exam recorded".green());
        }
        LicenseCommand::Suspend {
            license_id,
            reason,
            actor,
        } => {
            report(licenses.suspend(LicenseId(license_id), reason, &actor).await)?;
            println!("{}", "✓ License suspended".green());
        }
        LicenseCommand::Reminders { license_id } => {
            let today = host.clock.today();
            for reminder in licenses.reminders(LicenseId(license_id)).await? {
                let line = format!("  {:>3} days before: {}", reminder.offset_days, reminder.date);
                if reminder.date < today {
                    println!("{}", line.dimmed());
                } else {
                    println!("{}", line);
                }
            }
        }
        LicenseCommand::Audit { license_id } => {
            let trail = licenses.audit_trail(LicenseId(license_id)).await?;
            if trail.is_empty() {
                println!("{}", "No audit entries".yellow());
            }
            for entry in trail {
                println!(
                    "{} {:<22} {} → {} by {}{}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M"),
                    entry.action,
                    entry.old_state.status,
                    entry.new_state.status,
                    entry.actor,
                    if entry.reason.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", entry.reason)
                    }
                );
            }
        }
    }

    Ok(())
}

/// Print a denial as a refusal rather than a failure trace.
fn report(result: Result<License, LicenseServiceError>) -> Result<License> {
    match result {
        Err(LicenseServiceError::Denied(reason)) => {
            println!("{}", format!("✗ Denied: {}", reason).red());
            anyhow::bail!("license action denied")
        }
        other => Ok(other?),
    }
}

fn print_license(license: &License) {
    println!("{}", format!("License {}", license.license_number).bold());
    println!("  ID:            {}", license.id.0);
    println!("  Agent:         {}", license.agent_id);
    println!("  Line:          {}{}", license.line, if license.is_primary { " (primary)" } else { "" });
    println!("  Type:          {}", license.license_type().as_str());
    println!("  Status:        {}", license.status());
    println!("  Issued:        {}", license.issue_date);
    println!("  Renewal due:   {}", license.renewal_date());
    println!("  Renewals:      {}", license.renewal_count());
    if let Some(cert) = &license.state.certificate_number {
        println!("  Certificate:   {}", cert);
    }
}
