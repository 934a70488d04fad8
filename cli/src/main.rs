// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Agent Lifecycle CLI
//!
//! The `lifecycle` binary drives license operations, the expiry sweep and
//! the termination/reinstatement processes, and hosts the scheduling daemon.
//!
//! ## Commands
//!
//! - `lifecycle license issue|show|list|renew|convert|record-exam|suspend|reminders|audit`
//! - `lifecycle sweep run|history|send-reminders`
//! - `lifecycle agent register|show|terminate|reinstate|decide|cancel`
//! - `lifecycle daemon start|stop|status`, `lifecycle --daemon` (foreground)
//! - `lifecycle config show|validate|generate`
//! - `lifecycle db migrate`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use agent_lifecycle::commands::{
    self, AgentCommand, ConfigCommand, DaemonCommand, DbCommand, LicenseCommand, SweepCommand,
};
use agent_lifecycle::daemon;
use lifecycle_core::domain::lifecycle_config::LifecycleConfigManifest;

/// Agent lifecycle and license renewal orchestration
#[derive(Parser)]
#[command(name = "lifecycle")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the scheduling daemon in the foreground
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "LIFECYCLE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config file, then info
    #[arg(long, global = true, env = "LIFECYCLE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (compact, json); defaults to the config file, then compact
    #[arg(long, global = true, env = "LIFECYCLE_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// License operations
    #[command(name = "license")]
    License {
        #[command(subcommand)]
        command: LicenseCommand,
    },

    /// Expiry sweep and reminders
    #[command(name = "sweep")]
    Sweep {
        #[command(subcommand)]
        command: SweepCommand,
    },

    /// Agent registration, termination and reinstatement
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Manage daemon lifecycle
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Database maintenance
    #[command(name = "db")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let (level, format) = logging_settings(&cli);
    init_logging(&level, &format)?;

    if cli.daemon {
        info!("Starting lifecycle daemon");
        return daemon::run_daemon(cli.config).await;
    }

    match cli.command {
        Some(Commands::License { command }) => commands::license::handle_command(command, cli.config).await,
        Some(Commands::Sweep { command }) => commands::sweep::handle_command(command, cli.config).await,
        Some(Commands::Agent { command }) => commands::agent::handle_command(command, cli.config).await,
        Some(Commands::Daemon { command }) => commands::daemon::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Db { command }) => commands::db::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Flags win over the config file's observability section.
fn logging_settings(cli: &Cli) -> (String, String) {
    let configured = LifecycleConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|c| c.spec.observability)
        .and_then(|o| o.logging);

    let level = cli
        .log_level
        .clone()
        .or_else(|| configured.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| configured.map(|l| l.format))
        .unwrap_or_else(|| "compact".to_string());
    (level, format)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init(),
    }

    Ok(())
}
