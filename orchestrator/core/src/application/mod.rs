// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod expiry_sweep;
pub mod license_service;
pub mod process_runtime;
pub mod reinstatement;
pub mod repository_factory;
pub mod retry;
pub mod termination;

// Re-export use cases for convenience
pub use expiry_sweep::{ExpirySweep, SweepError, SweepOptions, SweepReport};
pub use license_service::{DueReminder, IssueLicenseRequest, LicenseService, LicenseServiceError};
pub use process_runtime::{CancelOutcome, CancelSignal, ProcessContext, ProcessOutcome, ProcessRuntime, ProcessSettings};
pub use reinstatement::{ReinstatementError, ReinstatementWorkflow, RequestReinstatement};
pub use repository_factory::{create_repositories, LifecycleRepositories};
pub use termination::{TerminateAgentRequest, TerminationError, TerminationWorkflow};
