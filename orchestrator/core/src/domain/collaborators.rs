// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Ports to the external systems the lifecycle processes drive.
//!
//! Every call here is a side effect outside our transaction boundary. The
//! processes wrap them in the retry policy and record failures instead of
//! aborting, so implementations should return an error rather than panic
//! and must tolerate being called again after a partial success.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Kinds of notification the engine sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TerminationNotice,
    ReinstatementApprovalNeeded,
    ReinstatementConfirmed,
    ReinstatementRejected,
    RenewalReminder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub agent_id: AgentId,
}

/// Input for the termination letter template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationLetter {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub reason: String,
    pub reason_code: String,
    pub effective_date: NaiveDate,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Render and store the letter, returning its URL.
    async fn render_termination_letter(
        &self,
        letter: &TerminationLetter,
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait PortalAccessService: Send + Sync {
    async fn disable(&self, agent_id: AgentId) -> Result<(), CollaboratorError>;
    async fn restore(&self, agent_id: AgentId) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait CommissionService: Send + Sync {
    async fn stop_payouts(&self, agent_id: AgentId) -> Result<(), CollaboratorError>;
}
