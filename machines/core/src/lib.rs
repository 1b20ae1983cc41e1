// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Component Communication & Orchestration Core
//!
//! In-process coordination layer for the Time Machines platform: a
//! process-wide publish/subscribe event bus, a component registry with
//! lifecycle bookkeeping, and capability-gated task dispatch between
//! independently built agents, time machines, and orchestrators.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Component messaging, discovery, and capability dispatch

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
