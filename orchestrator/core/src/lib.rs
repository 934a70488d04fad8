// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent lifecycle core
//!
//! License rules and records, the nightly expiry sweep, renewal reminders,
//! and the termination and reinstatement processes.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and storage adapters

pub mod domain;
pub mod application;
pub mod infrastructure;
