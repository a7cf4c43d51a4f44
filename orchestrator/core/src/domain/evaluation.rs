// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome feedback for one expert on one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertEvaluation {
    pub expert_id: String,
    pub task_id: String,
    pub is_correct: bool,
    /// Quality in [0, 1]
    pub quality_score: f64,
}

impl ExpertEvaluation {
    /// EMA target: wrong answers count for half their quality
    pub fn target_score(&self) -> f64 {
        let quality = self.quality_score.clamp(0.0, 1.0);
        if self.is_correct {
            quality
        } else {
            quality * 0.5
        }
    }
}

/// One applied score update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub expert_id: String,
    pub task_id: String,
    pub previous_score: f64,
    pub new_score: f64,
    pub target: f64,
    pub recorded_at: DateTime<Utc>,
}
