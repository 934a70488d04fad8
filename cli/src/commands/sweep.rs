// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Expiry sweep commands
//!
//! Commands: run, history, send-reminders

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use lifecycle_core::application::expiry_sweep::{SweepOptions, SweepReport};
use lifecycle_core::domain::batch::BatchOperationLog;
use lifecycle_core::domain::clock::Clock;

use super::parse_date;
use crate::embedded::LifecycleHost;

#[derive(Subcommand)]
pub enum SweepCommand {
    /// Expire every license past its renewal date
    Run {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Licenses per bulk transition (default: from config)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Run as of this date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Show recent sweep runs
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Print the batch logs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send renewal reminders due today
    SendReminders {
        /// Send as of this date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
    },
}

pub async fn handle_command(command: SweepCommand, config_path: Option<PathBuf>) -> Result<()> {
    let host = LifecycleHost::new(config_path).await?;

    match command {
        SweepCommand::Run {
            dry_run,
            chunk_size,
            date,
        } => {
            let run_date = match date {
                Some(d) => parse_date(&d)?,
                None => host.clock.today(),
            };
            let options = SweepOptions {
                run_date,
                dry_run: dry_run || host.config.spec.sweep.dry_run,
                chunk_size: chunk_size.unwrap_or(host.config.spec.sweep.chunk_size),
            };
            let report = host.sweep.run(options).await?;
            print_report(&report);
        }
        SweepCommand::History { limit, json } => {
            let runs = host.repositories.batch_logs.list_recent(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
                return Ok(());
            }
            if runs.is_empty() {
                println!("{}", "No sweep runs recorded".yellow());
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<14} {:>6} {:>6} {:>6}",
                "RUN", "DATE", "PHASE", "FOUND", "OK", "FAILED"
            );
            for log in runs {
                print_history_row(&log);
            }
        }
        SweepCommand::SendReminders { date } => {
            let today = match date {
                Some(d) => parse_date(&d)?,
                None => host.clock.today(),
            };
            let sent = host
                .licenses
                .send_due_reminders(host.collaborators.notifications.as_ref(), today)
                .await?;
            println!("{}", format!("✓ {} reminder(s) sent for {}", sent, today).green());
        }
    }

    Ok(())
}

fn print_report(report: &SweepReport) {
    let log = &report.log;
    let title = if log.dry_run {
        "Dry run complete".yellow().bold()
    } else {
        "Sweep complete".green().bold()
    };
    println!("{} ({})", title, log.id);
    println!("  Run date:      {}", log.run_date);
    println!("  Phase:         {}", log.phase.as_str());
    println!("  Chunks:        {} x {}", log.chunks, log.chunk_size);
    println!("  Found:         {}", log.total_found);
    if log.dry_run {
        println!("  Would expire:  {}", log.affected_license_ids.len());
        println!("  Agents:        {}", log.affected_agent_ids.len());
    } else {
        println!("  Expired:       {}", log.succeeded);
        println!("  Deactivated:   {}", report.deactivated_agents.len());
        if log.failed > 0 {
            println!("  {}", format!("Failed:        {}", log.failed).red());
            for id in &log.failed_ids {
                println!("    - {}", id);
            }
        }
        if !log.failed_agent_ids.is_empty() {
            println!(
                "  {}",
                format!("Agents still active (retried next run): {}", log.failed_agent_ids.len()).red()
            );
            for id in &log.failed_agent_ids {
                println!("    - {}", id);
            }
        }
    }
}

fn print_history_row(log: &BatchOperationLog) {
    let phase = if log.dry_run {
        format!("{}*", log.phase.as_str())
    } else {
        log.phase.as_str().to_string()
    };
    println!(
        "{:<38} {:<10} {:<14} {:>6} {:>6} {:>6}",
        log.id.to_string(),
        log.run_date.to_string(),
        phase,
        log.total_found,
        log.succeeded,
        log.failed
    );
}
