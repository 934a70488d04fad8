// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod collaborators;
pub mod db;
pub mod decision_gate;
pub mod event_bus;
pub mod repositories;

pub use collaborators::Collaborators;
pub use decision_gate::DecisionGate;
pub use event_bus::{DomainEvent, EventBus};
