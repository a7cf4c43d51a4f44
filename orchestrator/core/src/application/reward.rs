// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reward Predictor
//!
//! Biases routing scores with synthesized wisdom.
//!
//! ## Boost Function
//!
//! `adjusted = base × top_factor × synergy_factor` where
//!
//! | Factor | Value | Range |
//! |--------|-------|-------|
//! | `top_factor` | `1 + TOP_EXPERT_BONUS × (5 − rank) / 5` for ranked experts, else 1 | [1.0, 1.10] |
//! | `synergy_factor` | `1 + SYNERGY_BONUS × mean synergy with experts already selected` | [1.0, 1.10] |
//!
//! Both factors are monotonic (better rank or higher synergy never lowers the
//! score) and the combined boost is capped at ×1.21, so wisdom alone cannot
//! overturn a base-score gap larger than 21%.

use crate::domain::wisdom::{SwarmWisdom, SynergyMatrix};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

pub const TOP_EXPERT_BONUS: f64 = 0.10;
pub const SYNERGY_BONUS: f64 = 0.10;
pub const MAX_TOP_EXPERTS: usize = 5;

#[derive(Default)]
struct PredictorState {
    wisdom: SwarmWisdom,
    /// Cached `top_factor` per ranked expert
    top_bias: HashMap<String, f64>,
    /// Bumped on every mutation; routing caches compare against it
    version: u64,
}

#[derive(Default)]
pub struct RewardPredictor {
    state: RwLock<PredictorState>,
}

impl RewardPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_wisdom(wisdom: SwarmWisdom) -> Self {
        let predictor = Self::new();
        predictor.load_wisdom(wisdom);
        predictor
    }

    /// Replace the held wisdom and recompute derived biases
    pub fn load_wisdom(&self, wisdom: SwarmWisdom) {
        let mut state = self.state.write();
        state.wisdom = wisdom;
        state.top_bias = compute_top_bias(&state.wisdom.top_experts);
        state.version += 1;
    }

    pub fn wisdom(&self) -> SwarmWisdom {
        self.state.read().wisdom.clone()
    }

    /// Monotonic counter of mutations. Scores adjusted under one version are
    /// stale once it changes.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Recompute cached biases from the current wisdom
    pub fn refresh_biases(&self) {
        let mut state = self.state.write();
        state.top_bias = compute_top_bias(&state.wisdom.top_experts);
        state.version += 1;
        debug!("Reward predictor biases refreshed for {} ranked experts", state.top_bias.len());
    }

    /// Merge `incoming` synergies, keeping the larger value per pair.
    ///
    /// Returns the number of pairs that were added or raised.
    pub fn merge_synergies(&self, incoming: &SynergyMatrix) -> usize {
        let mut state = self.state.write();
        let mut changed = 0;
        for (a, row) in incoming {
            let local_row = state.wisdom.expert_synergies.entry(a.clone()).or_default();
            for (b, value) in row {
                match local_row.get_mut(b) {
                    Some(local) if *local >= *value => {}
                    Some(local) => {
                        *local = *value;
                        changed += 1;
                    }
                    None => {
                        local_row.insert(b.clone(), *value);
                        changed += 1;
                    }
                }
            }
        }
        state.wisdom.expert_synergies.retain(|_, row| !row.is_empty());
        if changed > 0 {
            state.version += 1;
        }
        changed
    }

    /// Append experts from `incoming` that are not ranked locally, up to five in total
    pub fn merge_top_experts(&self, incoming: &[String]) {
        let mut state = self.state.write();
        let before = state.wisdom.top_experts.len();
        for id in incoming {
            if state.wisdom.top_experts.len() >= MAX_TOP_EXPERTS {
                break;
            }
            if !state.wisdom.top_experts.contains(id) {
                state.wisdom.top_experts.push(id.clone());
            }
        }
        if state.wisdom.top_experts.len() != before {
            state.version += 1;
        }
    }

    /// Bias a base score by top-expert membership
    pub fn adjust(&self, expert_id: &str, base_score: f64) -> f64 {
        let state = self.state.read();
        base_score * state.top_bias.get(expert_id).copied().unwrap_or(1.0)
    }

    /// Bias a base score by top-expert membership and synergy with `selected`
    pub fn adjust_in_context(&self, expert_id: &str, base_score: f64, selected: &[String]) -> f64 {
        let state = self.state.read();
        let top_factor = state.top_bias.get(expert_id).copied().unwrap_or(1.0);

        let synergy_factor = if selected.is_empty() {
            1.0
        } else {
            let total: f64 = selected
                .iter()
                .map(|other| {
                    state
                        .wisdom
                        .synergy(expert_id, other)
                        .unwrap_or(0.0)
                        .clamp(0.0, 1.0)
                })
                .sum();
            1.0 + SYNERGY_BONUS * (total / selected.len() as f64)
        };

        base_score * top_factor * synergy_factor
    }
}

fn compute_top_bias(top_experts: &[String]) -> HashMap<String, f64> {
    top_experts
        .iter()
        .take(MAX_TOP_EXPERTS)
        .enumerate()
        .map(|(rank, id)| {
            let factor = 1.0
                + TOP_EXPERT_BONUS * (MAX_TOP_EXPERTS - rank) as f64 / MAX_TOP_EXPERTS as f64;
            (id.clone(), factor)
        })
        .collect()
}
