// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon lifecycle management commands
//!
//! Commands: start, stop, status

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use crate::daemon::{check_daemon_running, get_pid_file_path, stop_daemon, DaemonStatus};
use lifecycle_core::domain::lifecycle_config::LifecycleConfigManifest;
use lifecycle_core::domain::repository::StorageBackend;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon (if not already running)
    Start,

    /// Stop the daemon gracefully
    Stop {
        /// Force kill if daemon doesn't stop gracefully
        #[arg(short, long)]
        force: bool,

        /// Timeout in seconds (default: 30)
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Check daemon status
    Status,
}

pub async fn handle_command(command: DaemonCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        DaemonCommand::Start => start(config_path),
        DaemonCommand::Stop { force, timeout } => stop(force, timeout).await,
        DaemonCommand::Status => status(),
    }
}

fn start(config_path: Option<PathBuf>) -> Result<()> {
    // Fail here rather than in the detached child
    let config = LifecycleConfigManifest::load_or_default(config_path.clone())
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    if matches!(config.storage_backend(), StorageBackend::InMemory) {
        println!(
            "{}",
            "WARNING: Using the in-memory backend; state is lost when the daemon stops.".yellow()
        );
    }

    if let DaemonStatus::Running { pid, .. } = check_daemon_running()? {
        println!("{}", format!("✓ Daemon already running (PID: {})", pid).green());
        println!("Use 'lifecycle daemon stop' to stop it first.");
        return Ok(());
    }
    info!("Daemon not running, starting...");

    // Re-exec self with --daemon flag
    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = std::process::Command::new(current_exe);
    cmd.arg("--daemon");
    if let Some(config) = config_path {
        cmd.arg("--config").arg(config);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let temp_dir = std::env::temp_dir();
    let stdout_path = temp_dir.join("agent-lifecycle.out");
    let stderr_path = temp_dir.join("agent-lifecycle.err");

    let stdout_file = std::fs::File::create(&stdout_path).context("Failed to create stdout log file")?;
    let stderr_file = std::fs::File::create(&stderr_path).context("Failed to create stderr log file")?;

    cmd.stdin(std::process::Stdio::null())
        .stdout(stdout_file)
        .stderr(stderr_file);

    println!("Redirecting logs to: {}", stdout_path.display());

    let child = cmd.spawn().context("Failed to spawn daemon process")?;

    println!("{}", format!("✓ Daemon starting (PID: {})", child.id()).green());
    println!("Check status with: lifecycle daemon status");

    Ok(())
}

async fn stop(force: bool, timeout: u64) -> Result<()> {
    match check_daemon_running()? {
        DaemonStatus::Stopped => {
            println!("{}", "ℹ Daemon not running".yellow());
        }
        DaemonStatus::Running { pid, .. } => {
            println!("Stopping daemon (PID: {})...", pid);
            stop_daemon(force, timeout).await?;
            println!("{}", "✓ Daemon stopped".green());
        }
    }

    Ok(())
}

fn status() -> Result<()> {
    match check_daemon_running()? {
        DaemonStatus::Running { pid, uptime } => {
            println!("{}", "✓ Daemon is running".green());
            println!("  PID: {}", pid);
            if let Some(uptime) = uptime {
                println!("  Uptime: {}", format_duration(uptime));
            }
            println!("  PID file: {}", get_pid_file_path().display());
        }
        DaemonStatus::Stopped => {
            println!("{}", "✗ Daemon is not running".red());
        }
    }

    Ok(())
}

fn format_duration(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::format_duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "0m");
        assert_eq!(format_duration(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_duration(2 * 86400 + 3600), "2d 1h 0m");
    }
}
