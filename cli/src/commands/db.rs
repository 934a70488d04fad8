// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Database maintenance commands
//!
//! Commands: migrate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use lifecycle_core::domain::lifecycle_config::LifecycleConfigManifest;
use lifecycle_core::domain::repository::StorageBackend;
use lifecycle_core::infrastructure::db::Database;

#[derive(Subcommand)]
pub enum DbCommand {
    /// Apply pending schema migrations
    Migrate,
}

pub async fn handle_command(command: DbCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        DbCommand::Migrate => migrate(config_path).await,
    }
}

async fn migrate(config_path: Option<PathBuf>) -> Result<()> {
    let config = LifecycleConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let StorageBackend::PostgreSQL(pg) = config.storage_backend() else {
        anyhow::bail!("Migrations need the postgres backend; set spec.database or LIFECYCLE_DATABASE_URL");
    };

    let db = Database::new(&pg).await?;
    db.migrate().await?;

    println!("{}", "✓ Database schema is up to date".green());
    Ok(())
}
