// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent commands
//!
//! Commands: register, show, terminate, reinstate, decide, cancel

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use lifecycle_core::application::process_runtime::{CancelOutcome, ProcessOutcome};
use lifecycle_core::application::reinstatement::RequestReinstatement;
use lifecycle_core::application::termination::TerminateAgentRequest;
use lifecycle_core::domain::agent::{Agent, AgentId};
use lifecycle_core::domain::clock::Clock;
use lifecycle_core::domain::process::{LifecycleProcess, StepError};
use lifecycle_core::domain::reinstatement::{ReinstatementDecision, ReinstatementId, ReinstatementRequest};
use lifecycle_core::domain::termination::{TerminationId, TerminationRecord};

use super::parse_date;
use crate::embedded::LifecycleHost;

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Register an agent
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,
    },

    /// Show an agent with its licenses and processes
    Show {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,
    },

    /// Terminate an agent and run the termination steps
    Terminate {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,

        #[arg(long)]
        reason: String,

        #[arg(long, default_value = "OTHER")]
        reason_code: String,

        /// YYYY-MM-DD (default: today)
        #[arg(long)]
        effective_date: Option<String>,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,

        /// Return once the record exists instead of waiting for the steps
        #[arg(long)]
        no_wait: bool,
    },

    /// Open a reinstatement request for a terminated agent
    Reinstate {
        #[arg(value_name = "AGENT_ID")]
        agent_id: Uuid,

        #[arg(long)]
        reason: String,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Decide a pending reinstatement request
    Decide {
        #[arg(value_name = "REQUEST_ID")]
        request_id: Uuid,

        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Rejection reason
        #[arg(long, value_name = "REASON")]
        reject: Option<String>,

        #[arg(long)]
        conditions: Option<String>,

        #[arg(long)]
        probation_days: Option<u32>,

        #[arg(long, env = "USER", default_value = "cli")]
        approver: String,
    },

    /// Cancel a running termination or reinstatement
    Cancel {
        #[arg(long, conflicts_with = "reinstatement", required_unless_present = "reinstatement")]
        termination: Option<Uuid>,

        #[arg(long)]
        reinstatement: Option<Uuid>,

        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },
}

pub async fn handle_command(command: AgentCommand, config_path: Option<PathBuf>) -> Result<()> {
    let host = LifecycleHost::new(config_path).await?;

    match command {
        AgentCommand::Register { name, email } => {
            let agent = Agent::new(name, email);
            host.repositories.agents.save(&agent).await?;
            println!("{}", format!("✓ Agent registered: {}", agent.id).green());
        }
        AgentCommand::Show { agent_id } => show_agent(&host, AgentId(agent_id)).await?,
        AgentCommand::Terminate {
            agent_id,
            reason,
            reason_code,
            effective_date,
            actor,
            no_wait,
        } => {
            let effective_date = match effective_date {
                Some(d) => parse_date(&d)?,
                None => host.clock.today(),
            };
            let record = host
                .runtime
                .terminate_agent(TerminateAgentRequest {
                    agent_id: AgentId(agent_id),
                    reason,
                    reason_code,
                    effective_date,
                    initiated_by: actor,
                })
                .await?;
            println!("{}", format!("✓ Termination started: {}", record.id).green());

            if no_wait {
                println!("  Remaining steps will be resumed by the daemon");
                return Ok(());
            }
            let outcome = host
                .runtime
                .wait(LifecycleProcess::Termination {
                    termination_id: record.id,
                })
                .await?;
            if let ProcessOutcome::Termination(status) = outcome {
                println!("  Status: {}", status);
            }
            print_termination(&host.runtime.terminations().get(record.id).await?);
        }
        AgentCommand::Reinstate {
            agent_id,
            reason,
            actor,
        } => {
            let created = host
                .runtime
                .reinstatements()
                .request(RequestReinstatement {
                    agent_id: AgentId(agent_id),
                    reason,
                    requested_by: actor,
                })
                .await?;
            println!("{}", format!("✓ Reinstatement requested: {}", created.id).green());
            println!(
                "  Decision due by {}",
                created.decision_deadline.format("%Y-%m-%d %H:%M UTC")
            );
        }
        AgentCommand::Decide {
            request_id,
            approve,
            reject,
            conditions,
            probation_days,
            approver,
        } => {
            let decision = match (approve, reject) {
                (true, _) => ReinstatementDecision::Approve {
                    approver,
                    conditions,
                    probation_days,
                },
                (false, Some(reason)) => ReinstatementDecision::Reject { approver, reason },
                (false, None) => anyhow::bail!("Either --approve or --reject is required"),
            };
            let resolved = host
                .runtime
                .submit_decision(ReinstatementId(request_id), decision)
                .await?;
            println!("{}", format!("✓ Decision recorded: {}", resolved.status).green());
            print_reinstatement(&resolved);
        }
        AgentCommand::Cancel {
            termination,
            reinstatement,
            actor,
        } => {
            let process = match (termination, reinstatement) {
                (Some(id), _) => LifecycleProcess::Termination {
                    termination_id: TerminationId(id),
                },
                (None, Some(id)) => LifecycleProcess::Reinstatement {
                    request_id: ReinstatementId(id),
                },
                (None, None) => anyhow::bail!("Either --termination or --reinstatement is required"),
            };
            match host.runtime.cancel(process, &actor).await? {
                CancelOutcome::Signalled => println!("{}", format!("✓ Cancellation signalled: {}", process).green()),
                CancelOutcome::Recorded => println!("{}", format!("✓ Cancelled: {}", process).green()),
            }
        }
    }

    Ok(())
}

async fn show_agent(host: &LifecycleHost, agent_id: AgentId) -> Result<()> {
    let repos = &host.repositories;
    let agent = repos
        .agents
        .get(agent_id)
        .await?
        .with_context(|| format!("Agent {} not found", agent_id))?;

    println!("{}", format!("Agent {}", agent.name).bold());
    println!("  ID:            {}", agent.id);
    println!("  Email:         {}", agent.email);
    println!("  Status:        {}", agent.status);
    println!("  Commission:    {}", on_off(agent.commission_enabled));
    println!("  Portal:        {}", on_off(agent.portal_access_enabled));
    if let Some(details) = &agent.termination {
        println!(
            "  Terminated:    {} ({}, effective {})",
            details.reason, details.reason_code, details.effective_date
        );
    }

    let licenses = repos.licenses.find_by_agent(agent_id).await?;
    if !licenses.is_empty() {
        println!("\n{}", "Licenses".bold());
        for license in licenses {
            println!(
                "  {:<16} {:<8} {:<12} {:<10} renewal {}",
                license.license_number,
                license.line,
                license.license_type().as_str(),
                license.status(),
                license.renewal_date()
            );
        }
    }

    let terminations = repos.terminations.find_by_agent(agent_id).await?;
    for record in &terminations {
        println!();
        print_termination(record);
    }

    let requests = repos.reinstatements.find_by_agent(agent_id).await?;
    for request in &requests {
        println!();
        print_reinstatement(request);
    }

    Ok(())
}

fn print_termination(record: &TerminationRecord) {
    println!("{}", format!("Termination {}", record.id).bold());
    println!("  Status:        {}", record.workflow_status);
    println!("  Reason:        {} ({})", record.reason, record.reason_code);
    println!("  Effective:     {}", record.effective_date);
    let flags = &record.flags;
    println!(
        "  Steps:         status={} portal={} payouts={} letter={} archive={} notices={}",
        tick(flags.status_updated),
        tick(flags.portal_disabled),
        tick(flags.payouts_stopped),
        tick(flags.letter_generated),
        tick(flags.data_archived),
        tick(flags.notifications_sent)
    );
    if let Some(url) = &record.letter_url {
        println!("  Letter:        {}", url);
    }
    print_errors(&record.errors);
}

fn print_reinstatement(request: &ReinstatementRequest) {
    println!("{}", format!("Reinstatement {}", request.id).bold());
    println!("  Status:        {}", request.status);
    println!("  Requested by:  {}", request.requested_by);
    println!(
        "  Deadline:      {}",
        request.decision_deadline.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(approver) = &request.approver {
        let suffix = if request.system_decided { " (automatic)" } else { "" };
        println!("  Decided by:    {}{}", approver, suffix);
    }
    if let Some(conditions) = &request.conditions {
        println!("  Conditions:    {}", conditions);
    }
    if let Some(days) = request.probation_days {
        println!("  Probation:     {} days", days);
    }
    if let Some(reason) = &request.rejection_reason {
        println!("  Rejected:      {}", reason);
    }
    print_errors(&request.errors);
}

fn print_errors(errors: &[StepError]) {
    for err in errors {
        println!(
            "  {} {}: {} (attempts {})",
            "!".red(),
            err.step,
            err.message,
            err.attempts
        );
    }
}

fn tick(done: bool) -> colored::ColoredString {
    if done {
        "✓".green()
    } else {
        "✗".red()
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
