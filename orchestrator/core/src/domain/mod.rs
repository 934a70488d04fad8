// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Aggregates, the license rule engine, the reminder calendar and the
//! repository and collaborator contracts. Nothing in here performs I/O.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Business rules and persistence/collaborator interfaces

pub mod agent;
pub mod archive;
pub mod batch;
pub mod clock;
pub mod collaborators;
pub mod events;
pub mod license;
pub mod license_rules;
pub mod lifecycle_config;
pub mod process;
pub mod reinstatement;
pub mod reminder;
pub mod repository;
pub mod termination;
