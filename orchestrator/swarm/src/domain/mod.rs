// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure request types. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`swarm`] | `ExecutionMode`, `ExecutionState`, `TaskOutcome`, `OrchestratorError`, `DedupError` |

pub mod swarm;

pub use swarm::*;
