// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Heterogeneous Pairing - Drafter/Verifier Matching
//
// Quantized hardware (fp8_bitnet, int4_quant) drafts; tensor-core and standard
// hardware verifies. Both sides are ranked by performance and zipped
// rank-for-rank, so the best drafter is checked by the best verifier.

use crate::domain::expert::ExpertProfile;
use crate::domain::routing::ExpertDirectory;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativePair {
    pub drafter: ExpertProfile,
    pub verifier: ExpertProfile,
}

impl SpeculativePair {
    pub fn ids(&self) -> (&str, &str) {
        (&self.drafter.agent_id, &self.verifier.agent_id)
    }
}

/// Drafter/verifier pairs for `domain`, best first.
///
/// Experts tagged `general` qualify for every domain. The result is truncated
/// to the shorter side.
pub fn identify_pairs(directory: &dyn ExpertDirectory, domain: &str) -> Vec<SpeculativePair> {
    let (mut drafters, mut verifiers): (Vec<ExpertProfile>, Vec<ExpertProfile>) = directory
        .list_experts()
        .into_iter()
        .filter(|e| e.serves_domain(domain))
        .partition(|e| e.acceleration_type.is_drafter());

    verifiers.retain(|e| e.acceleration_type.is_verifier());

    // Stable: equal scores keep registration order
    drafters.sort_by(|a, b| b.performance_score.total_cmp(&a.performance_score));
    verifiers.sort_by(|a, b| b.performance_score.total_cmp(&a.performance_score));

    let pairs: Vec<SpeculativePair> = drafters
        .into_iter()
        .zip(verifiers)
        .map(|(drafter, verifier)| SpeculativePair { drafter, verifier })
        .collect();

    debug!(domain, pairs = pairs.len(), "Identified speculative pairs");
    pairs
}
