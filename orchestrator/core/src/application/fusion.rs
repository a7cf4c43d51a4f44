// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Weighted Fusion
//!
//! Merges N expert outputs into one consensus result.
//!
//! | Mode | Winner | `consensus_score` |
//! |------|--------|-------------------|
//! | `weighted_plurality` | Distinct text with the largest weight sum | winning sum / total weight |
//! | `semantic_consensus` | Output with the highest weight-averaged similarity to the others | that average |
//! | `top_ranked` | First output | its weight / total weight |
//!
//! `semantic_consensus` degrades to `weighted_plurality` when no similarity
//! service is configured.

use crate::domain::audit::steps;
use crate::domain::fusion::{FusionError, FusionMode, FusionResult};
use crate::domain::similarity::SimilarityService;
use crate::infrastructure::audit_logger::AuditLogger;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct WeightedFusion {
    similarity: Option<Arc<dyn SimilarityService>>,
    audit: Option<Arc<AuditLogger>>,
}

struct Pick {
    index: usize,
    consensus: f64,
    mode: FusionMode,
}

impl WeightedFusion {
    pub fn new(
        similarity: Option<Arc<dyn SimilarityService>>,
        audit: Option<Arc<AuditLogger>>,
    ) -> Self {
        Self { similarity, audit }
    }

    /// Fuse `outputs` under `weights`.
    ///
    /// `expert_ids` is aligned with `outputs`; missing ids are tolerated and
    /// simply do not appear in `contributing_experts`.
    pub async fn fuse(
        &self,
        task_id: &str,
        outputs: &[String],
        weights: &[f64],
        expert_ids: &[String],
        mode: FusionMode,
    ) -> Result<FusionResult, FusionError> {
        validate_inputs(outputs, weights)?;
        let started = Instant::now();
        let total_weight: f64 = weights.iter().sum();

        let pick = match mode {
            FusionMode::WeightedPlurality => weighted_plurality(outputs, weights, total_weight),
            FusionMode::SemanticConsensus => match &self.similarity {
                Some(service) => semantic_consensus(service.as_ref(), outputs, weights).await?,
                None => {
                    debug!("No similarity service configured, falling back to weighted plurality");
                    weighted_plurality(outputs, weights, total_weight)
                }
            },
            FusionMode::TopRanked => Pick {
                index: 0,
                consensus: weights[0] / total_weight,
                mode: FusionMode::TopRanked,
            },
        };

        let merged_content = outputs[pick.index].clone();
        let contributing_experts: Vec<String> = match pick.mode {
            FusionMode::TopRanked => expert_ids.first().cloned().into_iter().collect(),
            _ => outputs
                .iter()
                .zip(expert_ids.iter())
                .filter(|(output, _)| **output == merged_content)
                .map(|(_, id)| id.clone())
                .collect(),
        };
        let consensus_score = pick.consensus.clamp(0.0, 1.0);

        let metadata = HashMap::from([
            ("mode".to_string(), json!(pick.mode.as_str())),
            ("requested_mode".to_string(), json!(mode.as_str())),
            ("candidates".to_string(), json!(outputs.len())),
            ("total_weight".to_string(), json!(total_weight)),
        ]);

        metrics::histogram!("hive_fusion_consensus_score", "mode" => pick.mode.as_str())
            .record(consensus_score);

        if let Some(audit) = &self.audit {
            audit.log(
                task_id,
                steps::EXPERT_FUSION,
                format!("Fused {} outputs via {}", outputs.len(), pick.mode),
                json!({
                    "mode": pick.mode.as_str(),
                    "consensus_score": consensus_score,
                    "fusion_quality": consensus_score,
                    "contributing_experts": contributing_experts,
                }),
                started.elapsed().as_millis() as u64,
            );
        }

        Ok(FusionResult {
            merged_content,
            consensus_score,
            contributing_experts,
            metadata,
        })
    }
}

fn validate_inputs(outputs: &[String], weights: &[f64]) -> Result<(), FusionError> {
    if outputs.is_empty() {
        return Err(FusionError::Empty);
    }
    if outputs.len() != weights.len() {
        return Err(FusionError::LengthMismatch {
            outputs: outputs.len(),
            weights: weights.len(),
        });
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
        return Err(FusionError::InvalidWeights);
    }
    Ok(())
}

/// Heaviest distinct text; the earliest text wins ties.
fn weighted_plurality(outputs: &[String], weights: &[f64], total_weight: f64) -> Pick {
    let mut sums: Vec<(&str, usize, f64)> = Vec::new();
    for (idx, (output, weight)) in outputs.iter().zip(weights.iter()).enumerate() {
        match sums.iter_mut().find(|(text, _, _)| *text == output.as_str()) {
            Some(entry) => entry.2 += weight,
            None => sums.push((output.as_str(), idx, *weight)),
        }
    }

    let mut best = (0usize, f64::NEG_INFINITY);
    for (_, first_idx, sum) in &sums {
        if *sum > best.1 {
            best = (*first_idx, *sum);
        }
    }

    Pick {
        index: best.0,
        consensus: best.1 / total_weight,
        mode: FusionMode::WeightedPlurality,
    }
}

async fn semantic_consensus(
    service: &dyn SimilarityService,
    outputs: &[String],
    weights: &[f64],
) -> Result<Pick, FusionError> {
    if outputs.len() == 1 {
        return Ok(Pick {
            index: 0,
            consensus: 1.0,
            mode: FusionMode::SemanticConsensus,
        });
    }

    let vectors = service.embed_batch(outputs).await?;
    if vectors.len() != outputs.len() {
        warn!(
            "Similarity backend returned {} vectors for {} outputs",
            vectors.len(),
            outputs.len()
        );
        return Err(FusionError::LengthMismatch {
            outputs: outputs.len(),
            weights: vectors.len(),
        });
    }

    let mut best = (0usize, f64::NEG_INFINITY);
    for i in 0..outputs.len() {
        let mut weighted = 0.0;
        let mut others_weight = 0.0;
        for j in 0..outputs.len() {
            if i == j {
                continue;
            }
            weighted += weights[j] * service.similarity(&vectors[i], &vectors[j]);
            others_weight += weights[j];
        }
        let score = if others_weight > 0.0 {
            weighted / others_weight
        } else {
            0.0
        };
        if score > best.1 {
            best = (i, score);
        }
    }

    Ok(Pick {
        index: best.0,
        consensus: best.1,
        mode: FusionMode::SemanticConsensus,
    })
}
