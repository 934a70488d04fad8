// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. Observers (the
// CLI's `--follow` output, the daemon's log stream) subscribe here.
// Events are not persisted; the store and its audit trail are the record.

use crate::domain::agent::AgentId;
use crate::domain::events::{LicenseEvent, ReinstatementEvent, SweepEvent, TerminationEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    License(LicenseEvent),
    Sweep(SweepEvent),
    Termination(TerminationEvent),
    Reinstatement(ReinstatementEvent),
}

impl DomainEvent {
    /// The agent an event concerns; sweep summaries concern many.
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            DomainEvent::License(LicenseEvent::LicenseTransitioned { agent_id, .. }) => Some(*agent_id),
            DomainEvent::Sweep(_) => None,
            DomainEvent::Termination(event) => Some(match event {
                TerminationEvent::TerminationStarted { agent_id, .. }
                | TerminationEvent::TerminationStepRecorded { agent_id, .. }
                | TerminationEvent::TerminationFinished { agent_id, .. } => *agent_id,
            }),
            DomainEvent::Reinstatement(event) => Some(match event {
                ReinstatementEvent::ReinstatementRequested { agent_id, .. }
                | ReinstatementEvent::ReinstatementResolved { agent_id, .. }
                | ReinstatementEvent::ReinstatementCompleted { agent_id, .. } => *agent_id,
            }),
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity determines how many events can be buffered before slow
    /// receivers start lagging
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_license_event(&self, event: LicenseEvent) {
        self.publish(DomainEvent::License(event));
    }

    pub fn publish_sweep_event(&self, event: SweepEvent) {
        self.publish(DomainEvent::Sweep(event));
    }

    pub fn publish_termination_event(&self, event: TerminationEvent) {
        self.publish(DomainEvent::Termination(event));
    }

    pub fn publish_reinstatement_event(&self, event: ReinstatementEvent) {
        self.publish(DomainEvent::Reinstatement(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to events concerning a single agent
    pub fn subscribe_agent(&self, agent_id: AgentId) -> AgentEventReceiver {
        AgentEventReceiver {
            receiver: self.sender.subscribe(),
            agent_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one agent
pub struct AgentEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    agent_id: AgentId,
}

impl AgentEventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.agent_id() == Some(self.agent_id) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reinstatement::ReinstatementId;
    use crate::domain::termination::TerminationId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let agent_id = AgentId::new();

        event_bus.publish_termination_event(TerminationEvent::TerminationStarted {
            termination_id: TerminationId::new(),
            agent_id,
            reason_code: "FRAUD".to_string(),
            started_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Termination(TerminationEvent::TerminationStarted { agent_id: id, .. }) => {
                assert_eq!(id, agent_id);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agent_event_filtering() {
        let event_bus = EventBus::new(10);
        let agent_id = AgentId::new();
        let mut receiver = event_bus.subscribe_agent(agent_id);

        event_bus.publish_reinstatement_event(ReinstatementEvent::ReinstatementRequested {
            request_id: ReinstatementId::new(),
            agent_id: AgentId::new(),
            requested_by: "someone.else".to_string(),
            decision_deadline: Utc::now(),
        });
        event_bus.publish_reinstatement_event(ReinstatementEvent::ReinstatementRequested {
            request_id: ReinstatementId::new(),
            agent_id,
            requested_by: "agent.self".to_string(),
            decision_deadline: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.agent_id(), Some(agent_id));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let event_bus = EventBus::default();
        assert_eq!(event_bus.subscriber_count(), 0);
        event_bus.publish_termination_event(TerminationEvent::TerminationFinished {
            termination_id: TerminationId::new(),
            agent_id: AgentId::new(),
            status: crate::domain::termination::WorkflowStatus::Completed,
            error_count: 0,
            finished_at: Utc::now(),
        });
    }
}
