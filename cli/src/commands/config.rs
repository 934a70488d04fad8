// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use lifecycle_core::domain::lifecycle_config::{BackendKind, LifecycleConfigManifest};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default filled in
    Generate {
        #[arg(short, long, default_value = "./lifecycle-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = LifecycleConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. LIFECYCLE_CONFIG_PATH: {}",
            std::env::var("LIFECYCLE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./lifecycle-config.yaml");
        println!("  4. ~/.agent-lifecycle/config.yaml");
        println!("  5. /etc/agent-lifecycle/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", format!("Host: {}", config.metadata.name).bold());
    println!();

    println!("{}", "Storage:".bold());
    match spec.database.backend {
        BackendKind::InMemory => println!("  Backend: in-memory"),
        BackendKind::Postgres => {
            println!("  Backend: postgres");
            // Credentials stay out of the terminal
            let url = spec.database.url.as_deref().map(redact_url);
            println!("  URL: {}", url.as_deref().unwrap_or("(not set)"));
            println!("  Max connections: {}", spec.database.max_connections);
        }
    }
    println!();

    println!("{}", "Expiry sweep:".bold());
    println!("  Chunk size: {}", spec.sweep.chunk_size);
    println!("  Dry run: {}", spec.sweep.dry_run);
    println!("  Daily at: {:02}:00 UTC", spec.sweep.schedule_hour_utc);
    println!("  Actor: {}", spec.sweep.actor);
    println!();

    println!("{}", "Reminders:".bold());
    let offsets: Vec<String> = spec.reminders.offsets_days.iter().map(|d| d.to_string()).collect();
    println!("  Days before renewal: {}", offsets.join(", "));
    println!();

    println!("{}", "Processes:".bold());
    println!(
        "  Retry: {} attempts, {}ms to {}ms",
        spec.retry.max_attempts, spec.retry.initial_delay_ms, spec.retry.max_delay_ms
    );
    println!(
        "  Decision timeout: {} days (polled every {}s)",
        spec.reinstatement.decision_timeout_days, spec.reinstatement.poll_interval_seconds
    );
    println!("  Approver: {}", spec.reinstatement.approver_email);
    println!();

    println!("{}", "Collaborators:".bold());
    let collab = &spec.collaborators;
    for (name, endpoint) in [
        ("notifications", &collab.notification_endpoint),
        ("documents", &collab.document_endpoint),
        ("portal", &collab.portal_endpoint),
        ("commission", &collab.commission_endpoint),
    ] {
        println!(
            "  {:<14} {}",
            name,
            endpoint.as_deref().unwrap_or("(logging only)")
        );
    }

    if let Some(metrics) = spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        println!();
        println!("{}", "Metrics:".bold());
        println!("  Enabled: {} (port {})", metrics.enabled, metrics.port);
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = LifecycleConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    if output.exists() {
        anyhow::bail!("Refusing to overwrite existing file {}", output.display());
    }

    LifecycleConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url_hides_credentials() {
        assert_eq!(
            redact_url("postgres://lifecycle:secret@db:5432/lifecycle"),
            "postgres://***@db:5432/lifecycle"
        );
        assert_eq!(redact_url("postgres://db/lifecycle"), "postgres://db/lifecycle");
    }

    #[test]
    fn test_generate_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifecycle-config.yaml");

        generate(path.clone()).unwrap();
        let loaded = LifecycleConfigManifest::from_yaml_file(&path).unwrap();
        loaded.validate().unwrap();

        assert!(generate(path).is_err());
    }
}
