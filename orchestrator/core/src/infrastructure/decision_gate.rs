// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Decision Gate - wake-up channel for reinstatement processes waiting on a
//! human decision.
//!
//! The gate carries no decision data. A decision is written to the store
//! first (where the PENDING guard makes exactly one writer win); the gate
//! only tells the waiting process to go and look. A process on another host
//! never sees this signal and finds the decision through its poll instead.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use crate::domain::reinstatement::ReinstatementId;

#[derive(Clone, Default)]
pub struct DecisionGate {
    waiters: Arc<RwLock<HashMap<ReinstatementId, Arc<Notify>>>>,
}

impl DecisionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a request. Re-registering returns the existing
    /// handle so a signal sent in between is not lost.
    pub async fn register(&self, request_id: ReinstatementId) -> Arc<Notify> {
        let mut waiters = self.waiters.write().await;
        let notify = waiters
            .entry(request_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        debug!(request_id = %request_id, "Decision waiter registered");
        notify
    }

    /// Wake the process waiting on `request_id`. Returns false when no
    /// process on this host is waiting.
    pub async fn signal(&self, request_id: ReinstatementId) -> bool {
        let waiters = self.waiters.read().await;
        match waiters.get(&request_id) {
            Some(notify) => {
                // notify_one stores a permit if the waiter is between polls
                notify.notify_one();
                info!(request_id = %request_id, "Decision signal delivered");
                true
            }
            None => {
                debug!(request_id = %request_id, "No local waiter for decision signal");
                false
            }
        }
    }

    /// Drop the waiter. Returns true when a signal arrived that the waiter
    /// never consumed; the caller then owns the decision's follow-up work.
    ///
    /// `signal` and `release` serialise on the map lock, so a submitter
    /// either sees `signal` return false or the waiter sees the permit here.
    pub async fn release(&self, request_id: ReinstatementId) -> bool {
        let removed = self.waiters.write().await.remove(&request_id);
        match removed {
            Some(notify) => notify.notified().now_or_never().is_some(),
            None => false,
        }
    }

    pub async fn waiting(&self) -> Vec<ReinstatementId> {
        self.waiters.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_before_wait_is_not_lost() {
        let gate = DecisionGate::new();
        let id = ReinstatementId::new();
        let notify = gate.register(id).await;

        assert!(gate.signal(id).await);
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .expect("stored permit should complete the wait");
    }

    #[tokio::test]
    async fn test_signal_without_waiter() {
        let gate = DecisionGate::new();
        let id = ReinstatementId::new();
        assert!(!gate.signal(id).await);

        gate.register(id).await;
        assert_eq!(gate.waiting().await, vec![id]);
        assert!(!gate.release(id).await);
        assert!(gate.waiting().await.is_empty());
    }

    #[tokio::test]
    async fn test_release_reports_unconsumed_signal() {
        let gate = DecisionGate::new();
        let id = ReinstatementId::new();
        gate.register(id).await;

        assert!(gate.signal(id).await);
        assert!(gate.release(id).await);
        assert!(!gate.signal(id).await);
    }
}
