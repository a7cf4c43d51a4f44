// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cross-task statistics mined from audit trails.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// `expert_synergies[a][b]`: mean fusion quality of tasks where `a` and `b` were co-selected,
/// normalised by `a`'s occurrence count.
pub type SynergyMatrix = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmWisdom {
    pub expert_synergies: SynergyMatrix,

    /// Most frequently selected experts, best first (at most five)
    pub top_experts: Vec<String>,

    /// Mean fusion quality per domain. Tenant-private.
    pub domain_baselines: HashMap<String, f64>,

    /// Tasks that contributed to these statistics
    #[serde(default)]
    pub tasks_analyzed: usize,
}

/// Wisdom with tenant-private fields removed, safe to share across tenants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedInsights {
    pub expert_synergies: SynergyMatrix,
    pub top_experts: Vec<String>,
}

impl SwarmWisdom {
    pub fn synergy(&self, a: &str, b: &str) -> Option<f64> {
        self.expert_synergies.get(a).and_then(|row| row.get(b)).copied()
    }
}
