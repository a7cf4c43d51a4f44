// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod topology;
pub mod dedup;
pub mod orchestrator;

pub use dedup::{LeaderGuard, PendingResult, QueryDeduplicator, Registration};
pub use orchestrator::SwarmOrchestrator;
pub use topology::TopologyManager;
