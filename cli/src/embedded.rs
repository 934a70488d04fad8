// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process wiring of the lifecycle services.
//!
//! Every command builds a [`LifecycleHost`] from the configuration and talks
//! to the services directly. With the in-memory backend state lives only as
//! long as the process, so one-shot commands are mostly useful against
//! PostgreSQL; the daemon is the long-lived host either way.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use lifecycle_core::{
    application::{
        expiry_sweep::ExpirySweep,
        license_service::LicenseService,
        process_runtime::{ProcessContext, ProcessRuntime, ProcessSettings},
        repository_factory::{create_repositories, LifecycleRepositories},
    },
    domain::{
        clock::{Clock, SystemClock},
        lifecycle_config::LifecycleConfigManifest,
        reminder::ReminderScheduler,
        repository::StorageBackend,
    },
    infrastructure::{
        collaborators::Collaborators, db::Database, decision_gate::DecisionGate,
        event_bus::EventBus,
    },
};

pub struct LifecycleHost {
    pub config: LifecycleConfigManifest,
    pub repositories: LifecycleRepositories,
    pub collaborators: Collaborators,
    pub event_bus: EventBus,
    pub clock: Arc<dyn Clock>,
    pub licenses: LicenseService,
    pub sweep: ExpirySweep,
    pub runtime: ProcessRuntime,
}

impl LifecycleHost {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = LifecycleConfigManifest::load_or_default(config_path)
            .context("Failed to load configuration")?;
        config.validate().context("Configuration validation failed")?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: LifecycleConfigManifest) -> Result<Self> {
        let backend = config.storage_backend();
        let pool = match &backend {
            StorageBackend::PostgreSQL(pg) => {
                let db = Database::new(pg).await?;
                Some(db.get_pool().clone())
            }
            StorageBackend::InMemory => None,
        };
        let repositories = create_repositories(&backend, pool)?;
        let collaborators = Collaborators::from_config(&config.spec.collaborators)
            .context("Failed to initialize collaborator clients")?;
        let event_bus = EventBus::with_default_capacity();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let licenses = LicenseService::new(
            repositories.licenses.clone(),
            repositories.agents.clone(),
            clock.clone(),
            event_bus.clone(),
            ReminderScheduler::new(config.spec.reminders.offsets_days.iter().copied()),
        );
        let sweep = ExpirySweep::new(
            repositories.licenses.clone(),
            repositories.agents.clone(),
            repositories.batch_logs.clone(),
            clock.clone(),
            event_bus.clone(),
            config.spec.sweep.actor.clone(),
        );
        let runtime = ProcessRuntime::new(ProcessContext {
            repositories: repositories.clone(),
            collaborators: collaborators.clone(),
            event_bus: event_bus.clone(),
            gate: DecisionGate::new(),
            clock: clock.clone(),
            settings: ProcessSettings::from_config(&config.spec),
        });

        info!(
            host = %config.metadata.name,
            backend = match backend {
                StorageBackend::InMemory => "in-memory",
                StorageBackend::PostgreSQL(_) => "postgres",
            },
            "Lifecycle services initialized"
        );

        Ok(Self {
            config,
            repositories,
            collaborators,
            event_bus,
            clock,
            licenses,
            sweep,
            runtime,
        })
    }
}
