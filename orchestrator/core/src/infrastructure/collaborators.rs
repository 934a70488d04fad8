// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Collaborator Adapters
//!
//! Concrete implementations of the ports in `crate::domain::collaborators`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Reach the notification, document, portal and commission
//!   systems
//! - **Integration:** JSON over HTTP (reqwest) → external service
//!
//! Each service is configured independently. A service without an endpoint
//! gets the logging adapter, which records the call with `tracing` and
//! succeeds, so a development host can run every process end to end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::agent::AgentId;
use crate::domain::collaborators::{
    CollaboratorError, CommissionService, DocumentService, Notification, NotificationService,
    PortalAccessService, TerminationLetter,
};
use crate::domain::lifecycle_config::CollaboratorsConfig;

/// The four collaborators a process needs, resolved from configuration.
#[derive(Clone)]
pub struct Collaborators {
    pub notifications: Arc<dyn NotificationService>,
    pub documents: Arc<dyn DocumentService>,
    pub portal: Arc<dyn PortalAccessService>,
    pub commissions: Arc<dyn CommissionService>,
}

impl Collaborators {
    pub fn from_config(config: &CollaboratorsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        let token = config.resolved_token();
        let endpoint = |url: &Option<String>| {
            url.as_ref()
                .map(|u| JsonEndpoint::new(client.clone(), u.clone(), token.clone()))
        };

        let notifications: Arc<dyn NotificationService> = match endpoint(&config.notification_endpoint) {
            Some(e) => Arc::new(HttpNotificationService { endpoint: e }),
            None => Arc::new(LoggingCollaborator),
        };
        let documents: Arc<dyn DocumentService> = match endpoint(&config.document_endpoint) {
            Some(e) => Arc::new(HttpDocumentService { endpoint: e }),
            None => Arc::new(LoggingCollaborator),
        };
        let portal: Arc<dyn PortalAccessService> = match endpoint(&config.portal_endpoint) {
            Some(e) => Arc::new(HttpPortalAccessService { endpoint: e }),
            None => Arc::new(LoggingCollaborator),
        };
        let commissions: Arc<dyn CommissionService> = match endpoint(&config.commission_endpoint) {
            Some(e) => Arc::new(HttpCommissionService { endpoint: e }),
            None => Arc::new(LoggingCollaborator),
        };

        Ok(Self {
            notifications,
            documents,
            portal,
            commissions,
        })
    }

    /// Logging adapters for every service.
    pub fn logging() -> Self {
        Self {
            notifications: Arc::new(LoggingCollaborator),
            documents: Arc::new(LoggingCollaborator),
            portal: Arc::new(LoggingCollaborator),
            commissions: Arc::new(LoggingCollaborator),
        }
    }
}

// ============================================================================
// HTTP adapters
// ============================================================================

#[derive(Clone)]
struct JsonEndpoint {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl JsonEndpoint {
    fn new(client: Client, base_url: String, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, CollaboratorError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct AgentRef {
    agent_id: AgentId,
}

#[derive(Deserialize)]
struct DocumentResponse {
    url: String,
}

pub struct HttpNotificationService {
    endpoint: JsonEndpoint,
}

#[async_trait]
impl NotificationService for HttpNotificationService {
    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.endpoint.post("notifications", notification).await?;
        Ok(())
    }
}

pub struct HttpDocumentService {
    endpoint: JsonEndpoint,
}

#[async_trait]
impl DocumentService for HttpDocumentService {
    async fn render_termination_letter(
        &self,
        letter: &TerminationLetter,
    ) -> Result<String, CollaboratorError> {
        let response = self.endpoint.post("documents/termination-letters", letter).await?;
        let body: DocumentResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;
        Ok(body.url)
    }
}

pub struct HttpPortalAccessService {
    endpoint: JsonEndpoint,
}

#[async_trait]
impl PortalAccessService for HttpPortalAccessService {
    async fn disable(&self, agent_id: AgentId) -> Result<(), CollaboratorError> {
        self.endpoint.post("portal-access/disable", &AgentRef { agent_id }).await?;
        Ok(())
    }

    async fn restore(&self, agent_id: AgentId) -> Result<(), CollaboratorError> {
        self.endpoint.post("portal-access/restore", &AgentRef { agent_id }).await?;
        Ok(())
    }
}

pub struct HttpCommissionService {
    endpoint: JsonEndpoint,
}

#[async_trait]
impl CommissionService for HttpCommissionService {
    async fn stop_payouts(&self, agent_id: AgentId) -> Result<(), CollaboratorError> {
        self.endpoint.post("commissions/stop", &AgentRef { agent_id }).await?;
        Ok(())
    }
}

// ============================================================================
// Logging adapter
// ============================================================================

pub struct LoggingCollaborator;

#[async_trait]
impl NotificationService for LoggingCollaborator {
    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            agent_id = %notification.agent_id,
            subject = %notification.subject,
            "Notification (logging adapter)"
        );
        Ok(())
    }
}

#[async_trait]
impl DocumentService for LoggingCollaborator {
    async fn render_termination_letter(
        &self,
        letter: &TerminationLetter,
    ) -> Result<String, CollaboratorError> {
        let url = format!("local://letters/termination-{}.pdf", letter.agent_id);
        info!(agent_id = %letter.agent_id, url = %url, "Termination letter (logging adapter)");
        Ok(url)
    }
}

#[async_trait]
impl PortalAccessService for LoggingCollaborator {
    async fn disable(&self, agent_id: AgentId) -> Result<(), CollaboratorError> {
        info!(agent_id = %agent_id, "Portal access disabled (logging adapter)");
        Ok(())
    }

    async fn restore(&self, agent_id: AgentId) -> Result<(), CollaboratorError> {
        info!(agent_id = %agent_id, "Portal access restored (logging adapter)");
        Ok(())
    }
}

#[async_trait]
impl CommissionService for LoggingCollaborator {
    async fn stop_payouts(&self, agent_id: AgentId) -> Result<(), CollaboratorError> {
        info!(agent_id = %agent_id, "Commission payouts stopped (logging adapter)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mockito::{Matcher, Server};

    fn letter(agent_id: AgentId) -> TerminationLetter {
        TerminationLetter {
            agent_id,
            agent_name: "Ines Moreau".to_string(),
            reason: "Contract ended".to_string(),
            reason_code: "END".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        }
    }

    fn pointed_at(url: String) -> CollaboratorsConfig {
        CollaboratorsConfig {
            document_endpoint: Some(url.clone()),
            portal_endpoint: Some(format!("{}/", url)),
            auth_token: Some("test-token".to_string()),
            ..CollaboratorsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_portal_disable_posts_agent_with_bearer_token() {
        let mut server = Server::new_async().await;
        let agent_id = AgentId::new();
        let mock = server
            .mock("POST", "/portal-access/disable")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::Json(serde_json::json!({ "agent_id": agent_id.to_string() })))
            .with_status(204)
            .create_async()
            .await;

        let collaborators = Collaborators::from_config(&pointed_at(server.url())).unwrap();
        collaborators.portal.disable(agent_id).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_document_service_returns_letter_url() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/documents/termination-letters")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"url":"https://docs.example.com/letters/42.pdf"}"#)
            .create_async()
            .await;

        let collaborators = Collaborators::from_config(&pointed_at(server.url())).unwrap();
        let url = collaborators
            .documents
            .render_termination_letter(&letter(AgentId::new()))
            .await
            .unwrap();
        assert_eq!(url, "https://docs.example.com/letters/42.pdf");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/documents/termination-letters")
            .with_status(503)
            .with_body("renderer offline")
            .create_async()
            .await;

        let collaborators = Collaborators::from_config(&pointed_at(server.url())).unwrap();
        let err = collaborators
            .documents
            .render_termination_letter(&letter(AgentId::new()))
            .await
            .unwrap_err();
        match err {
            CollaboratorError::Rejected { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "renderer offline");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_logging_document_service_returns_url() {
        let agent_id = AgentId::new();
        let url = LoggingCollaborator
            .render_termination_letter(&letter(agent_id))
            .await
            .unwrap();
        assert!(url.contains(&agent_id.to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = CollaboratorsConfig {
            portal_endpoint: Some("http://127.0.0.1:9".to_string()),
            request_timeout_seconds: 1,
            ..CollaboratorsConfig::default()
        };
        let collaborators = Collaborators::from_config(&config).unwrap();
        let err = collaborators.portal.disable(AgentId::new()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Network(_)));
        // Unconfigured services fall back to logging
        assert!(collaborators.commissions.stop_payouts(AgentId::new()).await.is_ok());
    }
}
