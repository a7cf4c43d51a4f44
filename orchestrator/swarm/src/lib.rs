// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `hive-swarm` - Swarm Orchestration Crate
//!
//! Turns the routing and consensus primitives of `hive-core` into a running
//! swarm: load-driven replica scaling, cross-request deduplication and the
//! request façade with its failover state machine.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `ExecutionMode`, `ExecutionState`, `TaskOutcome`, error types |
//! | [`application`] | Application | `TopologyManager`, `QueryDeduplicator`, `SwarmOrchestrator` |
//!
//! ## Ownership
//!
//! The orchestrator owns the gatekeeper and the topology manager. The
//! gatekeeper reports usage through a weak `UsageSink` handle and the topology
//! manager registers replicas through the narrow `ExpertDirectory` trait, so
//! neither holds the other.

pub mod domain;
pub mod application;

pub use domain::*;
