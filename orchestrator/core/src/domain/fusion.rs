// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::similarity::SimilarityError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Strategy used to merge several expert outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Sum weights per distinct output text and pick the heaviest
    #[default]
    WeightedPlurality,
    /// Pick the output with the highest weight-averaged similarity to the others
    SemanticConsensus,
    /// First output in input order
    TopRanked,
}

impl FusionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMode::WeightedPlurality => "weighted_plurality",
            FusionMode::SemanticConsensus => "semantic_consensus",
            FusionMode::TopRanked => "top_ranked",
        }
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for FusionMode {
    /// Unrecognised names fall back to [`FusionMode::TopRanked`].
    fn from(value: &str) -> Self {
        match value {
            "weighted_plurality" => FusionMode::WeightedPlurality,
            "semantic_consensus" => FusionMode::SemanticConsensus,
            _ => FusionMode::TopRanked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub merged_content: String,

    /// Agreement in [0, 1]
    pub consensus_score: f64,

    pub contributing_experts: Vec<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Malformed fusion input. Fatal to the call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FusionError {
    #[error("No outputs to fuse")]
    Empty,

    #[error("Got {outputs} outputs but {weights} weights")]
    LengthMismatch { outputs: usize, weights: usize },

    #[error("Weights must be finite and non-negative with a positive sum")]
    InvalidWeights,

    #[error("Similarity backend failed: {0}")]
    Similarity(#[from] SimilarityError),
}
