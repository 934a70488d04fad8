// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Notify;

use lifecycle_core::application::process_runtime::{
    CancelOutcome, ProcessContext, ProcessOutcome, ProcessRuntime, ProcessSettings,
};
use lifecycle_core::application::repository_factory::LifecycleRepositories;
use lifecycle_core::application::termination::TerminateAgentRequest;
use lifecycle_core::domain::agent::{Agent, AgentId, AgentStatus};
use lifecycle_core::domain::clock::SystemClock;
use lifecycle_core::domain::collaborators::{
    CollaboratorError, DocumentService, PortalAccessService, TerminationLetter,
};
use lifecycle_core::domain::events::TerminationEvent;
use lifecycle_core::domain::process::{LifecycleProcess, RetryPolicy};
use lifecycle_core::domain::repository::{AgentRepository, ArchiveRepository, TerminationRepository};
use lifecycle_core::domain::termination::WorkflowStatus;
use lifecycle_core::infrastructure::collaborators::Collaborators;
use lifecycle_core::infrastructure::decision_gate::DecisionGate;
use lifecycle_core::infrastructure::event_bus::{DomainEvent, EventBus};
use lifecycle_core::infrastructure::repositories::InMemoryLifecycleStore;

struct BrokenDocuments {
    calls: AtomicUsize,
}

#[async_trait]
impl DocumentService for BrokenDocuments {
    async fn render_termination_letter(&self, _letter: &TerminationLetter) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Rejected {
            status: 503,
            message: "template service unavailable".to_string(),
        })
    }
}

/// Portal that blocks inside `disable` until released.
struct SlowPortal {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl PortalAccessService for SlowPortal {
    async fn disable(&self, _agent_id: AgentId) -> Result<(), CollaboratorError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }

    async fn restore(&self, _agent_id: AgentId) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

fn runtime_with(store: Arc<InMemoryLifecycleStore>, collaborators: Collaborators, event_bus: EventBus) -> ProcessRuntime {
    ProcessRuntime::new(ProcessContext {
        repositories: LifecycleRepositories::in_memory(store),
        collaborators,
        event_bus,
        gate: DecisionGate::new(),
        clock: Arc::new(SystemClock),
        settings: ProcessSettings {
            retry: RetryPolicy::immediate(3),
            ..ProcessSettings::default()
        },
    })
}

async fn seeded_agent(store: &InMemoryLifecycleStore) -> Agent {
    let agent = Agent::new("Ruth Okafor", "ruth.okafor@example.com");
    AgentRepository::save(store, &agent).await.unwrap();
    agent
}

fn termination_request(agent_id: AgentId) -> TerminateAgentRequest {
    TerminateAgentRequest {
        agent_id,
        reason: "Misrepresentation of policy terms".to_string(),
        reason_code: "MISREP".to_string(),
        effective_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        initiated_by: "compliance.officer".to_string(),
    }
}

#[tokio::test]
async fn test_failed_letter_does_not_stop_later_steps() {
    let store = Arc::new(InMemoryLifecycleStore::new());
    let agent = seeded_agent(&store).await;
    let documents = Arc::new(BrokenDocuments {
        calls: AtomicUsize::new(0),
    });
    let collaborators = Collaborators {
        documents: documents.clone(),
        ..Collaborators::logging()
    };
    let runtime = runtime_with(store.clone(), collaborators, EventBus::with_default_capacity());

    let record = runtime.terminate_agent(termination_request(agent.id)).await.unwrap();
    let outcome = runtime
        .wait(LifecycleProcess::Termination {
            termination_id: record.id,
        })
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Termination(WorkflowStatus::Completed));
    assert_eq!(documents.calls.load(Ordering::SeqCst), 3);

    let stored = TerminationRepository::get(store.as_ref(), record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.workflow_status, WorkflowStatus::Completed);
    assert!(stored.flags.status_updated);
    assert!(stored.flags.portal_disabled);
    assert!(stored.flags.payouts_stopped);
    assert!(!stored.flags.letter_generated);
    assert!(stored.flags.data_archived);
    assert!(stored.flags.notifications_sent);
    assert_eq!(stored.errors.len(), 1);
    assert_eq!(stored.errors[0].step, "generate_letter");
    assert_eq!(stored.errors[0].attempts, 3);
    assert!(stored.letter_url.is_none());

    let archives = ArchiveRepository::find_by_agent(store.as_ref(), agent.id).await.unwrap();
    assert_eq!(archives.len(), 1);

    let terminated = AgentRepository::get(store.as_ref(), agent.id).await.unwrap().unwrap();
    assert_eq!(terminated.status, AgentStatus::Terminated);
    assert!(!terminated.portal_access_enabled);
    assert!(!terminated.commission_enabled);
}

#[tokio::test]
async fn test_termination_publishes_progress_events() {
    let store = Arc::new(InMemoryLifecycleStore::new());
    let agent = seeded_agent(&store).await;
    let event_bus = EventBus::with_default_capacity();
    let mut receiver = event_bus.subscribe_agent(agent.id);
    let runtime = runtime_with(store, Collaborators::logging(), event_bus);

    let record = runtime.terminate_agent(termination_request(agent.id)).await.unwrap();
    runtime
        .wait(LifecycleProcess::Termination {
            termination_id: record.id,
        })
        .await
        .unwrap();

    let mut steps = 0;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("event expected")
            .unwrap();
        match event {
            DomainEvent::Termination(TerminationEvent::TerminationStepRecorded { .. }) => steps += 1,
            DomainEvent::Termination(TerminationEvent::TerminationFinished { status, error_count, .. }) => {
                assert_eq!(status, WorkflowStatus::Completed);
                assert_eq!(error_count, 0);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(steps, 5);
}

#[tokio::test]
async fn test_cancel_running_termination_skips_remaining_steps() {
    let store = Arc::new(InMemoryLifecycleStore::new());
    let agent = seeded_agent(&store).await;
    let portal = Arc::new(SlowPortal {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let collaborators = Collaborators {
        portal: portal.clone(),
        ..Collaborators::logging()
    };
    let runtime = runtime_with(store.clone(), collaborators, EventBus::with_default_capacity());

    let record = runtime.terminate_agent(termination_request(agent.id)).await.unwrap();
    let process = LifecycleProcess::Termination {
        termination_id: record.id,
    };

    portal.entered.notified().await;
    assert_eq!(runtime.running(), vec![process]);
    assert_eq!(
        runtime.cancel(process, "hr.lead").await.unwrap(),
        CancelOutcome::Signalled
    );
    portal.release.notify_one();

    let outcome = runtime.wait(process).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Termination(WorkflowStatus::Failed));

    let stored = TerminationRepository::get(store.as_ref(), record.id)
        .await
        .unwrap()
        .unwrap();
    // The step in flight finishes, the rest are recorded as skipped
    assert!(stored.flags.portal_disabled);
    assert!(!stored.flags.payouts_stopped);
    assert_eq!(stored.errors.len(), 4);
    assert!(stored
        .errors
        .iter()
        .all(|e| e.attempts == 0 && e.message.contains("cancelled by hr.lead")));
    assert!(stored.completed_at.is_some());
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_cancel_finished_termination_is_refused() {
    let store = Arc::new(InMemoryLifecycleStore::new());
    let agent = seeded_agent(&store).await;
    let runtime = runtime_with(store, Collaborators::logging(), EventBus::with_default_capacity());

    let record = runtime.terminate_agent(termination_request(agent.id)).await.unwrap();
    let process = LifecycleProcess::Termination {
        termination_id: record.id,
    };
    runtime.wait(process).await.unwrap();

    tokio_test::assert_err!(runtime.cancel(process, "hr.lead").await);
}

#[tokio::test]
async fn test_resume_picks_up_unfinished_termination() {
    let store = Arc::new(InMemoryLifecycleStore::new());
    let agent = seeded_agent(&store).await;
    let runtime = runtime_with(store.clone(), Collaborators::logging(), EventBus::with_default_capacity());

    // Record created, process never started (host went down)
    let record = runtime
        .terminations()
        .begin(termination_request(agent.id))
        .await
        .unwrap();
    assert!(runtime.running().is_empty());

    let resumed = runtime.resume_incomplete().await.unwrap();
    let process = LifecycleProcess::Termination {
        termination_id: record.id,
    };
    assert_eq!(resumed, vec![process]);

    let outcome = runtime.wait(process).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Termination(WorkflowStatus::Completed));
    assert!(runtime.resume_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_termination_of_same_agent_is_rejected() {
    let store = Arc::new(InMemoryLifecycleStore::new());
    let agent = seeded_agent(&store).await;
    let runtime = runtime_with(store, Collaborators::logging(), EventBus::with_default_capacity());

    runtime.terminate_agent(termination_request(agent.id)).await.unwrap();
    let second = runtime.terminate_agent(termination_request(agent.id)).await;
    tokio_test::assert_err!(second);
    runtime.shutdown();
}
