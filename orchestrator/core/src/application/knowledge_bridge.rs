// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Tenant Knowledge Bridge - Cross-Tenant Wisdom Exchange
//
// Exports a tenant's wisdom without its domain baselines (they reveal the
// tenant's data distribution) and merges foreign insights into a predictor.
// Merging never lowers a local synergy value.

use crate::application::reward::RewardPredictor;
use crate::domain::wisdom::AnonymizedInsights;
use tracing::info;

pub struct TenantKnowledgeBridge {
    tenant_id: String,
}

impl TenantKnowledgeBridge {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Shareable view of `predictor`'s wisdom
    pub fn generate_anonymized_insights(&self, predictor: &RewardPredictor) -> AnonymizedInsights {
        let wisdom = predictor.wisdom();
        info!(
            tenant_id = %self.tenant_id,
            synergy_rows = wisdom.expert_synergies.len(),
            "Exporting anonymized insights"
        );
        AnonymizedInsights {
            expert_synergies: wisdom.expert_synergies,
            top_experts: wisdom.top_experts,
        }
    }

    /// Merge `insights` into `target` and refresh its cached biases.
    ///
    /// Returns the number of synergy pairs that were added or raised.
    pub fn apply_cross_tenant_wisdom(
        &self,
        target: &RewardPredictor,
        insights: &AnonymizedInsights,
    ) -> usize {
        let changed = target.merge_synergies(&insights.expert_synergies);
        target.merge_top_experts(&insights.top_experts);
        target.refresh_biases();
        info!(
            tenant_id = %self.tenant_id,
            changed,
            "Applied cross-tenant wisdom"
        );
        changed
    }
}
