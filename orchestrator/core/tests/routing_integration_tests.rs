// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the routing pipeline
//!
//! These tests exercise the gatekeeper together with its collaborators:
//! 1. Semantic routing against explicit specialization vectors
//! 2. Cache correctness across registry mutations
//! 3. Usage reporting and reward biasing
//! 4. Audit records and their JSON-lines persistence

use async_trait::async_trait;
use hive_core::application::gatekeeper::Gatekeeper;
use hive_core::application::reward::RewardPredictor;
use hive_core::domain::audit::steps;
use hive_core::domain::expert::{AccelerationType, ExpertProfile};
use hive_core::domain::routing::{RoutingError, UsageSink};
use hive_core::domain::similarity::{SimilarityError, SimilarityService};
use hive_core::domain::wisdom::SwarmWisdom;
use hive_core::infrastructure::audit_logger::AuditLogger;
use hive_core::infrastructure::embedding::HashingEmbedder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Embeds known prompts to fixed vectors; everything else maps to the poetry axis
struct FixedSimilarity {
    vectors: HashMap<String, Vec<f32>>,
}

impl FixedSimilarity {
    fn new() -> Self {
        let vectors = HashMap::from([
            ("implement quicksort in rust".to_string(), vec![1.0, 0.0]),
            ("write a haiku about rain".to_string(), vec![0.0, 1.0]),
        ]);
        Self { vectors }
    }
}

#[async_trait]
impl SimilarityService for FixedSimilarity {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SimilarityError> {
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| vec![0.0, 1.0]))
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<String>>);

impl UsageSink for RecordingSink {
    fn record_usage(&self, expert_id: &str) {
        self.0.lock().push(expert_id.to_string());
    }
}

fn coder_and_poet(similarity: Arc<dyn SimilarityService>) -> Gatekeeper {
    let gatekeeper = Gatekeeper::new(similarity, 100);
    gatekeeper.register_expert(ExpertProfile::new("coder", ["coding"]).with_specialization(vec![1.0, 0.0]));
    gatekeeper.register_expert(ExpertProfile::new("poet", ["poetry"]).with_specialization(vec![0.0, 1.0]));
    gatekeeper
}

#[tokio::test]
async fn test_coding_prompt_routes_to_coder() {
    let gatekeeper = coder_and_poet(Arc::new(FixedSimilarity::new()));

    let decision = gatekeeper.route("implement quicksort in rust", 2).await.unwrap();
    assert_eq!(decision.selected_experts, vec!["coder", "poet"]);
    assert!(decision.routing_weights[0] > decision.routing_weights[1]);

    let decision = gatekeeper.route("write a haiku about rain", 1).await.unwrap();
    assert_eq!(decision.primary(), Some("poet"));
}

#[tokio::test]
async fn test_routing_weights_always_sum_to_one() {
    let gatekeeper = Gatekeeper::new(Arc::new(HashingEmbedder::default()), 100);
    for (id, domain, score) in [("a", "rust", 0.9), ("b", "python", 0.4), ("c", "sql", 0.7), ("d", "go", 0.2)] {
        gatekeeper.register_expert(ExpertProfile::new(id, [domain]).with_performance(score));
    }

    for k in 1..=5 {
        let decision = gatekeeper.route("optimize this rust sql query", k).await.unwrap();
        assert_eq!(decision.selected_experts.len(), k.min(4));
        assert_eq!(decision.selected_experts.len(), decision.routing_weights.len());
        let total: f64 = decision.routing_weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-6, "k={} sum={}", k, total);
    }
}

#[tokio::test]
async fn test_cache_hit_until_registry_changes() {
    let audit = Arc::new(AuditLogger::default());
    let gatekeeper = coder_and_poet(Arc::new(FixedSimilarity::new())).with_audit(audit.clone());

    let first = gatekeeper.route("implement quicksort in rust", 2).await.unwrap();
    let second = gatekeeper.route("implement quicksort in rust", 2).await.unwrap();
    assert_eq!(first.selected_experts, second.selected_experts);
    assert_eq!(first.routing_weights, second.routing_weights);
    assert_ne!(first.task_id, second.task_id);
    assert_eq!(audit.get_trail(&second.task_id).last().unwrap().raw_data["cache_hit"], true);

    gatekeeper.update_expert_performance("poet", 0.3);
    assert_eq!(gatekeeper.cache_len(), 0);
    let third = gatekeeper.route("implement quicksort in rust", 2).await.unwrap();
    assert_ne!(third.task_id, first.task_id);
    assert_eq!(audit.get_trail(&third.task_id)[0].raw_data["cache_hit"], false);

    gatekeeper.register_expert(ExpertProfile::new("critic", ["coding"]).with_specialization(vec![1.0, 0.0]));
    let fourth = gatekeeper.route("implement quicksort in rust", 2).await.unwrap();
    assert_ne!(fourth.task_id, third.task_id);
}

#[tokio::test]
async fn test_routing_audit_carries_domain() {
    let audit = Arc::new(AuditLogger::default());
    let gatekeeper = coder_and_poet(Arc::new(FixedSimilarity::new())).with_audit(audit.clone());

    let decision = gatekeeper.route("implement quicksort in rust", 1).await.unwrap();
    let trail = audit.get_trail(&decision.task_id);
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].step, steps::ROUTING_DECISION);
    assert_eq!(trail[0].raw_data["domain"], "coding");
    assert_eq!(trail[0].raw_data["selected_experts"], serde_json::json!(["coder"]));
}

#[tokio::test]
async fn test_usage_sink_sees_every_selection() {
    let gatekeeper = coder_and_poet(Arc::new(FixedSimilarity::new()));
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn UsageSink> = sink.clone();
    gatekeeper.attach_usage_sink(Arc::downgrade(&dyn_sink));

    gatekeeper.route("implement quicksort in rust", 2).await.unwrap();
    gatekeeper.route("implement quicksort in rust", 1).await.unwrap();
    assert_eq!(*sink.0.lock(), vec!["coder", "poet", "coder"]);

    drop(dyn_sink);
    drop(sink);
    gatekeeper.route("implement quicksort in rust", 1).await.unwrap();
}

#[tokio::test]
async fn test_accelerated_hardware_breaks_even_similarity() {
    let gatekeeper = Gatekeeper::new(Arc::new(FixedSimilarity::new()), 10);
    gatekeeper.register_expert(ExpertProfile::new("cpu", ["coding"]).with_specialization(vec![1.0, 0.0]));
    gatekeeper.register_expert(
        ExpertProfile::new("gpu", ["coding"])
            .with_specialization(vec![1.0, 0.0])
            .with_acceleration(AccelerationType::H100Tensor),
    );

    let decision = gatekeeper.route("implement quicksort in rust", 1).await.unwrap();
    assert_eq!(decision.primary(), Some("gpu"));
}

#[tokio::test]
async fn test_reward_predictor_breaks_ties_and_detaches() {
    let gatekeeper = Gatekeeper::new(Arc::new(HashingEmbedder::default()), 10);
    gatekeeper.register_expert(ExpertProfile::new("a", ["coding"]));
    gatekeeper.register_expert(ExpertProfile::new("b", ["coding"]));

    assert_eq!(gatekeeper.route("coding", 1).await.unwrap().primary(), Some("a"));

    let predictor = Arc::new(RewardPredictor::from_wisdom(SwarmWisdom {
        top_experts: vec!["b".to_string()],
        ..Default::default()
    }));
    gatekeeper.set_reward_predictor(Some(predictor));
    assert_eq!(gatekeeper.route("coding", 1).await.unwrap().primary(), Some("b"));

    gatekeeper.set_reward_predictor(None);
    assert_eq!(gatekeeper.route("coding", 1).await.unwrap().primary(), Some("a"));
}

#[tokio::test]
async fn test_batch_route_preserves_order() {
    let gatekeeper = coder_and_poet(Arc::new(FixedSimilarity::new()));
    let prompts = vec![
        "write a haiku about rain".to_string(),
        "implement quicksort in rust".to_string(),
    ];

    let decisions = gatekeeper.batch_route(&prompts, 1).await.unwrap();
    let primaries: Vec<_> = decisions.iter().map(|d| d.primary().unwrap()).collect();
    assert_eq!(primaries, vec!["poet", "coder"]);
}

#[tokio::test]
async fn test_empty_registry_is_a_routing_error() {
    let gatekeeper = Gatekeeper::new(Arc::new(HashingEmbedder::default()), 10);
    let err = gatekeeper.batch_route(&["x".to_string()], 1).await.unwrap_err();
    assert_eq!(err, RoutingError::NoExperts);
}

#[tokio::test]
async fn test_audit_persists_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let audit = Arc::new(AuditLogger::default().with_persistence(&path));
    let gatekeeper = coder_and_poet(Arc::new(FixedSimilarity::new())).with_audit(audit.clone());

    gatekeeper.route("implement quicksort in rust", 1).await.unwrap();
    gatekeeper.route("write a haiku about rain", 1).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line["event_type"], "routing_decision");
        assert!(line["data"]["selected_experts"].is_array());
        assert!(line.get("description").is_some());
        assert!(line.get("duration_ms").is_some());
    }
}
