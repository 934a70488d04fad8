// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend configuration,
//! keeping the Domain Layer free of infrastructure dependencies.
//!
//! - Domain layer: defines repository traits (pure interfaces)
//! - Application layer: this factory picks the implementation
//! - Infrastructure layer: provides the concrete implementations
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Resolve every repository from one `StorageBackend`

use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::repository::{
    AgentRepository, ArchiveRepository, BatchLogRepository, LicenseRepository,
    ReinstatementRepository, StorageBackend, TerminationRepository,
};
use crate::infrastructure::repositories::{
    InMemoryLifecycleStore, PostgresBatchLogRepository, PostgresLicenseRepository,
    PostgresLifecycleRepository,
};

/// Every repository the services need, resolved against one backend.
#[derive(Clone)]
pub struct LifecycleRepositories {
    pub licenses: Arc<dyn LicenseRepository>,
    pub agents: Arc<dyn AgentRepository>,
    pub terminations: Arc<dyn TerminationRepository>,
    pub reinstatements: Arc<dyn ReinstatementRepository>,
    pub archives: Arc<dyn ArchiveRepository>,
    pub batch_logs: Arc<dyn BatchLogRepository>,
}

impl LifecycleRepositories {
    /// All repositories backed by one in-memory store. Sharing the store is
    /// what keeps cross-aggregate units atomic.
    pub fn in_memory(store: Arc<InMemoryLifecycleStore>) -> Self {
        Self {
            licenses: store.clone(),
            agents: store.clone(),
            terminations: store.clone(),
            reinstatements: store.clone(),
            archives: store.clone(),
            batch_logs: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let lifecycle = Arc::new(PostgresLifecycleRepository::new(pool.clone()));
        Self {
            licenses: Arc::new(PostgresLicenseRepository::new(pool.clone())),
            agents: lifecycle.clone(),
            terminations: lifecycle.clone(),
            reinstatements: lifecycle.clone(),
            archives: lifecycle,
            batch_logs: Arc::new(PostgresBatchLogRepository::new(pool)),
        }
    }

    /// Agent read for a process step, meant to run inside the step's retry
    /// loop. A missing agent is an error like any other.
    pub async fn agent_for_step(&self, id: AgentId) -> Result<Agent, String> {
        self.agents
            .get(id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Agent {} not found", id))
    }
}

/// Creates the repository set for the configured backend. The PostgreSQL
/// backend needs a connected pool.
pub fn create_repositories(
    backend: &StorageBackend,
    pool: Option<PgPool>,
) -> anyhow::Result<LifecycleRepositories> {
    match (backend, pool) {
        (StorageBackend::InMemory, _) => Ok(LifecycleRepositories::in_memory(Arc::new(
            InMemoryLifecycleStore::new(),
        ))),
        (StorageBackend::PostgreSQL(_), Some(pool)) => Ok(LifecycleRepositories::postgres(pool)),
        (StorageBackend::PostgreSQL(_), None) => {
            anyhow::bail!("PostgreSQL backend selected but no connection pool was provided")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::Agent;
    use crate::domain::repository::PostgresConfig;

    #[tokio::test]
    async fn test_in_memory_repositories_share_one_store() {
        let repos = create_repositories(&StorageBackend::InMemory, None).unwrap();
        let agent = Agent::new("Mina Park", "mina@example.com");
        repos.agents.save(&agent).await.unwrap();

        // Licenses and agents see the same state
        assert!(repos.licenses.find_by_agent(agent.id).await.unwrap().is_empty());
        assert_eq!(repos.agents.get(agent.id).await.unwrap(), Some(agent));
    }

    #[test]
    fn test_postgres_without_pool_is_an_error() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://localhost/lifecycle".to_string(),
            max_connections: 5,
        });
        assert!(create_repositories(&backend, None).is_err());
    }
}
