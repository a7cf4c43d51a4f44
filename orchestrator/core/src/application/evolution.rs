// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Expert Evolution Service - Online Score Adjustment
//
// new_score = clamp((1 - α) · current + α · target, 0.1, 1.0)
//
// The read and the write happen under one registry lock via
// Gatekeeper::adjust_expert_performance, which also invalidates the routing
// cache.

use crate::application::gatekeeper::Gatekeeper;
use crate::domain::evaluation::{EvolutionRecord, ExpertEvaluation};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EvolutionService {
    gatekeeper: Arc<Gatekeeper>,
    learning_rate: f64,
    history: Mutex<VecDeque<EvolutionRecord>>,
    history_limit: usize,
}

impl EvolutionService {
    pub fn new(gatekeeper: Arc<Gatekeeper>, learning_rate: f64, history_limit: usize) -> Self {
        Self {
            gatekeeper,
            learning_rate: learning_rate.clamp(0.0, 1.0),
            history: Mutex::new(VecDeque::new()),
            history_limit,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Fold one evaluation into the expert's score.
    ///
    /// Returns the new score, or `None` when the expert is not registered.
    pub fn process(&self, evaluation: &ExpertEvaluation) -> Option<f64> {
        let target = evaluation.target_score();
        let learning_rate = self.learning_rate;

        let Some((previous, new_score)) = self
            .gatekeeper
            .adjust_expert_performance(&evaluation.expert_id, |current| {
                (1.0 - learning_rate) * current + learning_rate * target
            })
        else {
            warn!(
                expert_id = %evaluation.expert_id,
                task_id = %evaluation.task_id,
                "Evaluation for unknown expert skipped"
            );
            return None;
        };

        debug!(
            expert_id = %evaluation.expert_id,
            previous,
            new_score,
            target,
            "Expert score evolved"
        );

        let mut history = self.history.lock();
        history.push_back(EvolutionRecord {
            expert_id: evaluation.expert_id.clone(),
            task_id: evaluation.task_id.clone(),
            previous_score: previous,
            new_score,
            target,
            recorded_at: Utc::now(),
        });
        while history.len() > self.history_limit {
            history.pop_front();
        }

        Some(new_score)
    }

    /// Recorded updates, oldest first
    pub fn history(&self) -> Vec<EvolutionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}
