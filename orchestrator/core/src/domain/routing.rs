// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Routing Domain Types
//!
//! | Type | Role |
//! |------|------|
//! | [`MoERoutingDecision`] | Immutable, cacheable output of the gatekeeper |
//! | [`UsageSink`] | Narrow interface the gatekeeper reports selections to |
//! | [`ExpertDirectory`] | Narrow registry interface for components that must not own the gatekeeper |
//! | [`RoutingError`] | Fatal routing failures |

use crate::domain::expert::ExpertProfile;
use crate::domain::similarity::SimilarityError;
use serde::{Deserialize, Serialize};

/// Result of routing one prompt.
///
/// `selected_experts` is ordered best-first and `routing_weights` is aligned
/// with it; the weights are softmax-normalised and sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoERoutingDecision {
    pub task_id: String,
    pub selected_experts: Vec<String>,
    pub routing_weights: Vec<f64>,
}

impl MoERoutingDecision {
    /// Best-ranked expert, if any was selected
    pub fn primary(&self) -> Option<&str> {
        self.selected_experts.first().map(String::as_str)
    }

    /// Weight assigned to `expert_id` in this decision
    pub fn weight_of(&self, expert_id: &str) -> Option<f64> {
        self.selected_experts
            .iter()
            .position(|id| id == expert_id)
            .and_then(|idx| self.routing_weights.get(idx).copied())
    }
}

/// Receives one call per selected expert per routing decision.
///
/// Implementations must return quickly; any heavy work is spawned.
pub trait UsageSink: Send + Sync {
    fn record_usage(&self, expert_id: &str);
}

/// Registry operations needed by components that sit beside the gatekeeper
/// (topology scaling, pairing) without holding a full gatekeeper handle.
pub trait ExpertDirectory: Send + Sync {
    fn get_expert(&self, expert_id: &str) -> Option<ExpertProfile>;

    fn register_expert(&self, profile: ExpertProfile);

    /// Number of registered replicas whose parent is `master_id`
    fn replica_count(&self, master_id: &str) -> usize;

    /// Snapshot of all profiles in registration order
    fn list_experts(&self) -> Vec<ExpertProfile>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("No experts registered")]
    NoExperts,

    #[error("All {0} registered experts are excluded from routing")]
    NoEligibleExperts(usize),

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Similarity backend failed: {0}")]
    Similarity(#[from] SimilarityError),
}
