// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trace Synthesizer
//!
//! Batch-mines audit trails into [`SwarmWisdom`].
//!
//! A task contributes only when its trail holds both a routing step (carrying
//! `selected_experts` and `domain`) and a fusion step (carrying
//! `fusion_quality`, or `consensus_score` when the quality is absent). When a
//! step repeats, as during failover, the last occurrence wins.
//!
//! | Output | Derivation |
//! |--------|------------|
//! | `domain_baselines[d]` | mean fusion quality of tasks routed in domain `d` |
//! | `expert_synergies[a][b]` | Σ quality over tasks selecting both, ÷ tasks selecting `a` |
//! | `top_experts` | experts by task count, descending, ties by id, at most five |

use crate::application::reward::MAX_TOP_EXPERTS;
use crate::domain::audit::{steps, SwarmAuditTrail};
use crate::domain::expert::GENERAL_DOMAIN;
use crate::domain::wisdom::{SwarmWisdom, SynergyMatrix};
use crate::infrastructure::audit_logger::AuditLogger;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

const ROUTING_STEPS: [&str; 2] = ["routing", steps::ROUTING_DECISION];
const FUSION_STEPS: [&str; 2] = ["fusion", steps::EXPERT_FUSION];

pub struct TraceSynthesizer {
    audit: Arc<AuditLogger>,
}

struct TaskSample {
    domain: String,
    experts: Vec<String>,
    quality: f64,
}

impl TraceSynthesizer {
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self { audit }
    }

    /// Analyze every trail currently held by the audit logger
    pub fn synthesize_wisdom(&self) -> SwarmWisdom {
        let snapshot = self.audit.snapshot();
        let wisdom = synthesize(snapshot.iter().map(|(_, trail)| trail.as_slice()));
        info!(
            tasks_analyzed = wisdom.tasks_analyzed,
            trails = snapshot.len(),
            "Synthesized swarm wisdom"
        );
        wisdom
    }
}

/// Build wisdom from an arbitrary set of trails
pub fn synthesize<'a, I>(trails: I) -> SwarmWisdom
where
    I: IntoIterator<Item = &'a [SwarmAuditTrail]>,
{
    let mut qualities: HashMap<String, Vec<f64>> = HashMap::new();
    let mut affinity: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    let mut occurrences: BTreeMap<String, usize> = BTreeMap::new();
    let mut tasks_analyzed = 0;

    for trail in trails {
        let Some(sample) = sample_task(trail) else {
            continue;
        };
        tasks_analyzed += 1;

        qualities
            .entry(sample.domain)
            .or_default()
            .push(sample.quality);

        for a in &sample.experts {
            *occurrences.entry(a.clone()).or_default() += 1;
            for b in &sample.experts {
                if a != b {
                    *affinity
                        .entry(a.clone())
                        .or_default()
                        .entry(b.clone())
                        .or_default() += sample.quality;
                }
            }
        }
    }

    let domain_baselines = qualities
        .into_iter()
        .map(|(domain, values)| {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            (domain, mean)
        })
        .collect();

    let expert_synergies: SynergyMatrix = affinity
        .into_iter()
        .map(|(a, row)| {
            let count = occurrences.get(&a).copied().unwrap_or(1).max(1) as f64;
            let row = row.into_iter().map(|(b, sum)| (b, sum / count)).collect();
            (a, row)
        })
        .collect();

    let mut ranked: Vec<(String, usize)> = occurrences.into_iter().collect();
    // BTreeMap iteration already orders ids; the stable sort keeps that for ties
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let top_experts = ranked
        .into_iter()
        .take(MAX_TOP_EXPERTS)
        .map(|(id, _)| id)
        .collect();

    SwarmWisdom {
        expert_synergies,
        top_experts,
        domain_baselines,
        tasks_analyzed,
    }
}

fn sample_task(trail: &[SwarmAuditTrail]) -> Option<TaskSample> {
    let routing = trail
        .iter()
        .rev()
        .find(|e| ROUTING_STEPS.contains(&e.step.as_str()))?;
    let fusion = trail
        .iter()
        .rev()
        .find(|e| FUSION_STEPS.contains(&e.step.as_str()))?;

    let mut experts: Vec<String> = Vec::new();
    for id in routing.raw_data.get("selected_experts")?.as_array()? {
        if let Some(id) = id.as_str() {
            if !experts.iter().any(|e| e == id) {
                experts.push(id.to_string());
            }
        }
    }

    let quality = fusion
        .raw_data
        .get("fusion_quality")
        .or_else(|| fusion.raw_data.get("consensus_score"))
        .and_then(|v| v.as_f64());
    let Some(quality) = quality else {
        debug!(task_id = %fusion.task_id, "Fusion step without quality, task skipped");
        return None;
    };

    let domain = routing
        .raw_data
        .get("domain")
        .and_then(|v| v.as_str())
        .unwrap_or(GENERAL_DOMAIN)
        .to_string();

    Some(TaskSample {
        domain,
        experts,
        quality,
    })
}
