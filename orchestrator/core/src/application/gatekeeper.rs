// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Gatekeeper - Expert Registry and Semantic Router
//!
//! Holds the expert registry, a bounded routing-decision cache, and the top-k
//! selection algorithm.
//!
//! ## Routing Algorithm
//!
//! 1. Cache lookup keyed by `top_k`, the excluded set and a bounded prompt prefix.
//! 2. Embed the prompt.
//! 3. `score = max(similarity, 0.01) × performance_score × hardware_multiplier`,
//!    optionally biased by the attached [`RewardPredictor`].
//! 4. Greedy top-k selection, ties broken by registration order.
//! 5. Softmax over the selected scores.
//!
//! ## Cache Discipline
//!
//! Every registry write (registration, score update, predictor swap) bumps a
//! generation counter and clears the cache while the registry write lock is
//! held. A miss computed against an older generation is never inserted, so a
//! decision produced before a write cannot leak into the cache after it.
//! Each entry also records the attached predictor's version; a hit whose
//! version no longer matches is discarded and recomputed.
//! Lock order is always registry → cache.

use crate::application::reward::RewardPredictor;
use crate::domain::audit::steps;
use crate::domain::events::SwarmEvent;
use crate::domain::expert::{clamp_performance, ExpertProfile};
use crate::domain::routing::{ExpertDirectory, MoERoutingDecision, RoutingError, UsageSink};
use crate::domain::similarity::SimilarityService;
use crate::infrastructure::audit_logger::AuditLogger;
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Characters of the prompt that participate in the cache key
pub const CACHE_KEY_PREFIX_CHARS: usize = 256;

/// Floor applied to raw similarity so no expert scores zero
pub const MIN_SIMILARITY: f64 = 0.01;

#[derive(Default)]
struct Registry {
    experts: Vec<ExpertProfile>,
    index: HashMap<String, usize>,
    generation: u64,
}

impl Registry {
    fn get(&self, expert_id: &str) -> Option<&ExpertProfile> {
        self.index.get(expert_id).map(|idx| &self.experts[*idx])
    }
}

struct CachedDecision {
    decision: MoERoutingDecision,
    predictor_version: Option<u64>,
}

struct Candidate {
    expert_id: String,
    base_score: f64,
}

pub struct Gatekeeper {
    registry: RwLock<Registry>,
    cache: Mutex<HashMap<String, CachedDecision>>,
    cache_max_size: usize,
    similarity: Arc<dyn SimilarityService>,
    reward_predictor: RwLock<Option<Arc<RewardPredictor>>>,
    usage_sink: RwLock<Option<Weak<dyn UsageSink>>>,
    audit: Option<Arc<AuditLogger>>,
    event_bus: Option<EventBus>,
}

impl Gatekeeper {
    pub fn new(similarity: Arc<dyn SimilarityService>, cache_max_size: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            cache: Mutex::new(HashMap::new()),
            cache_max_size,
            similarity,
            reward_predictor: RwLock::new(None),
            usage_sink: RwLock::new(None),
            audit: None,
            event_bus: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Attach the sink that receives one usage record per selected expert.
    ///
    /// Held weakly: the sink's owner controls its lifetime.
    pub fn attach_usage_sink(&self, sink: Weak<dyn UsageSink>) {
        *self.usage_sink.write() = Some(sink);
    }

    /// Attach or detach the reward predictor. Invalidates the routing cache.
    pub fn set_reward_predictor(&self, predictor: Option<Arc<RewardPredictor>>) {
        *self.reward_predictor.write() = predictor;
        self.clear_cache();
    }

    pub fn reward_predictor(&self) -> Option<Arc<RewardPredictor>> {
        self.reward_predictor.read().clone()
    }

    /// Register or replace an expert profile. Invalidates the routing cache.
    pub fn register_expert(&self, mut profile: ExpertProfile) {
        profile.performance_score = clamp_performance(profile.performance_score);
        let expert_id = profile.agent_id.clone();
        let is_replica = profile.is_replica;

        {
            let mut registry = self.registry.write();
            match registry.index.get(&expert_id).copied() {
                Some(idx) => {
                    debug!("Replacing profile for expert '{}'", expert_id);
                    registry.experts[idx] = profile;
                }
                None => {
                    let idx = registry.experts.len();
                    registry.experts.push(profile);
                    registry.index.insert(expert_id.clone(), idx);
                }
            }
            registry.generation += 1;
            self.cache.lock().clear();
        }

        info!(expert_id = %expert_id, is_replica, "Expert registered");
        if let Some(bus) = &self.event_bus {
            bus.publish(SwarmEvent::ExpertRegistered {
                expert_id,
                is_replica,
                registered_at: Utc::now(),
            });
        }
    }

    /// Set an expert's performance score (clamped). Invalidates the routing cache.
    ///
    /// Returns the previous score, or `None` when the expert is unknown.
    pub fn update_expert_performance(&self, expert_id: &str, score: f64) -> Option<f64> {
        self.adjust_expert_performance(expert_id, |_| score)
            .map(|(old, _)| old)
    }

    /// Replace an expert's score with `f(current)` (clamped) under a single
    /// registry write lock. Invalidates the routing cache.
    ///
    /// Returns `(old, new)`, or `None` when the expert is unknown.
    pub fn adjust_expert_performance<F>(&self, expert_id: &str, f: F) -> Option<(f64, f64)>
    where
        F: FnOnce(f64) -> f64,
    {
        let (old_score, new_score) = {
            let mut registry = self.registry.write();
            let Some(idx) = registry.index.get(expert_id).copied() else {
                warn!(expert_id, "Score update for unknown expert skipped");
                return None;
            };
            let old = registry.experts[idx].performance_score;
            let new = clamp_performance(f(old));
            registry.experts[idx].performance_score = new;
            registry.generation += 1;
            self.cache.lock().clear();
            (old, new)
        };

        debug!(expert_id, old_score, new_score, "Expert performance updated");
        if let Some(bus) = &self.event_bus {
            bus.publish(SwarmEvent::ExpertScoreUpdated {
                expert_id: expert_id.to_string(),
                old_score,
                new_score,
                updated_at: Utc::now(),
            });
        }
        Some((old_score, new_score))
    }

    /// Drop every cached decision
    pub fn clear_cache(&self) {
        let mut registry = self.registry.write();
        registry.generation += 1;
        self.cache.lock().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn get_expert(&self, expert_id: &str) -> Option<ExpertProfile> {
        self.registry.read().get(expert_id).cloned()
    }

    /// All profiles in registration order
    pub fn experts(&self) -> Vec<ExpertProfile> {
        self.registry.read().experts.clone()
    }

    pub fn expert_count(&self) -> usize {
        self.registry.read().experts.len()
    }

    /// Route a prompt to its `top_k` best experts
    pub async fn route(&self, prompt: &str, top_k: usize) -> Result<MoERoutingDecision, RoutingError> {
        self.route_for_task(None, prompt, top_k, &HashSet::new()).await
    }

    /// Route several prompts concurrently. Results follow input order.
    pub async fn batch_route(
        &self,
        prompts: &[String],
        top_k: usize,
    ) -> Result<Vec<MoERoutingDecision>, RoutingError> {
        futures::future::try_join_all(prompts.iter().map(|p| self.route(p, top_k))).await
    }

    /// Route on behalf of a known task, skipping `excluded` experts.
    ///
    /// The returned decision carries `task_id`, or a fresh id when none is
    /// given, and the audit record is filed under it. Cache hits are re-issued
    /// under that id with the cached selection and weights.
    pub async fn route_for_task(
        &self,
        task_id: Option<&str>,
        prompt: &str,
        top_k: usize,
        excluded: &HashSet<String>,
    ) -> Result<MoERoutingDecision, RoutingError> {
        if top_k == 0 {
            return Err(RoutingError::InvalidTopK);
        }

        let started = Instant::now();
        let key = cache_key(prompt, top_k, excluded);

        let task_id = task_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let current_version = self.predictor_version();
        let cached = {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(entry) if entry.predictor_version == current_version => Some(entry.decision.clone()),
                Some(_) => {
                    debug!("Reward predictor changed since decision was cached, recomputing");
                    cache.remove(&key);
                    None
                }
                None => None,
            }
        };
        if let Some(mut decision) = cached {
            metrics::counter!("hive_routing_cache_hits_total").increment(1);
            decision.task_id = task_id;
            self.after_decision(&decision, true, started);
            return Ok(decision);
        }
        metrics::counter!("hive_routing_cache_misses_total").increment(1);

        let (snapshot, generation) = {
            let registry = self.registry.read();
            (registry.experts.clone(), registry.generation)
        };
        if snapshot.is_empty() {
            return Err(RoutingError::NoExperts);
        }

        let eligible: Vec<ExpertProfile> = snapshot
            .into_iter()
            .filter(|e| !excluded.contains(&e.agent_id))
            .collect();
        if eligible.is_empty() {
            return Err(RoutingError::NoEligibleExperts(self.expert_count()));
        }

        let prompt_vector = self.similarity.embed(prompt).await?;
        let vectors = self.specialization_vectors(&eligible).await?;

        let candidates: Vec<Candidate> = eligible
            .iter()
            .zip(vectors.iter())
            .map(|(expert, vector)| {
                let similarity = self.similarity.similarity(&prompt_vector, vector).max(MIN_SIMILARITY);
                Candidate {
                    expert_id: expert.agent_id.clone(),
                    base_score: similarity
                        * expert.performance_score
                        * expert.acceleration_type.hardware_multiplier(),
                }
            })
            .collect();

        let predictor = self.reward_predictor.read().clone();
        let predictor_version = predictor.as_ref().map(|p| p.version());
        let selected = select_top_k(candidates, top_k, predictor.as_deref());

        let scores: Vec<f64> = selected.iter().map(|(_, s)| *s).collect();
        let decision = MoERoutingDecision {
            task_id,
            selected_experts: selected.into_iter().map(|(id, _)| id).collect(),
            routing_weights: softmax(&scores),
        };

        {
            let registry = self.registry.read();
            if registry.generation == generation {
                let mut cache = self.cache.lock();
                if cache.len() < self.cache_max_size {
                    cache.insert(
                        key,
                        CachedDecision {
                            decision: decision.clone(),
                            predictor_version,
                        },
                    );
                } else {
                    debug!("Routing cache full ({} entries), decision not cached", cache.len());
                }
            } else {
                debug!("Registry changed during routing, decision not cached");
            }
        }

        self.after_decision(&decision, false, started);
        Ok(decision)
    }

    fn predictor_version(&self) -> Option<u64> {
        self.reward_predictor.read().as_ref().map(|p| p.version())
    }

    /// Vectors aligned with `experts`, deriving and persisting missing ones.
    ///
    /// Derived vectors are a pure function of the domain tags, so writing them
    /// back does not invalidate the cache.
    async fn specialization_vectors(
        &self,
        experts: &[ExpertProfile],
    ) -> Result<Vec<Vec<f32>>, RoutingError> {
        let mut vectors = Vec::with_capacity(experts.len());
        let mut derived = Vec::new();

        for expert in experts {
            match &expert.specialization_vector {
                Some(v) => vectors.push(v.clone()),
                None => {
                    let v = self.similarity.embed(&expert.domain_seed()).await?;
                    derived.push((expert.agent_id.clone(), v.clone()));
                    vectors.push(v);
                }
            }
        }

        if !derived.is_empty() {
            let mut registry = self.registry.write();
            for (expert_id, vector) in derived {
                if let Some(idx) = registry.index.get(&expert_id).copied() {
                    let profile = &mut registry.experts[idx];
                    if profile.specialization_vector.is_none() {
                        debug!(expert_id = %expert_id, "Derived specialization vector from domains");
                        profile.specialization_vector = Some(vector);
                    }
                }
            }
        }

        Ok(vectors)
    }

    fn after_decision(&self, decision: &MoERoutingDecision, cache_hit: bool, started: Instant) {
        let sink = self.usage_sink.read().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            for expert_id in &decision.selected_experts {
                sink.record_usage(expert_id);
            }
        }

        if let Some(audit) = &self.audit {
            let domain = decision
                .primary()
                .and_then(|id| self.get_expert(id))
                .and_then(|e| e.primary_domain().map(str::to_string));
            audit.log(
                &decision.task_id,
                steps::ROUTING_DECISION,
                format!("Routed to {} expert(s)", decision.selected_experts.len()),
                json!({
                    "selected_experts": decision.selected_experts,
                    "routing_weights": decision.routing_weights,
                    "domain": domain,
                    "cache_hit": cache_hit,
                }),
                started.elapsed().as_millis() as u64,
            );
        }
    }
}

impl ExpertDirectory for Gatekeeper {
    fn get_expert(&self, expert_id: &str) -> Option<ExpertProfile> {
        Gatekeeper::get_expert(self, expert_id)
    }

    fn register_expert(&self, profile: ExpertProfile) {
        Gatekeeper::register_expert(self, profile)
    }

    fn replica_count(&self, master_id: &str) -> usize {
        self.registry
            .read()
            .experts
            .iter()
            .filter(|e| e.is_replica && e.parent_id.as_deref() == Some(master_id))
            .count()
    }

    fn list_experts(&self) -> Vec<ExpertProfile> {
        self.experts()
    }
}

fn cache_key(prompt: &str, top_k: usize, excluded: &HashSet<String>) -> String {
    let prefix: String = prompt.chars().take(CACHE_KEY_PREFIX_CHARS).collect();
    let mut excluded: Vec<&str> = excluded.iter().map(String::as_str).collect();
    excluded.sort_unstable();
    format!("{}|{}|{}", top_k, excluded.join(","), prefix)
}

/// Greedy selection: each round picks the highest adjusted score, earliest
/// registration winning ties. Synergy context grows as experts are picked.
fn select_top_k(
    mut remaining: Vec<Candidate>,
    top_k: usize,
    predictor: Option<&RewardPredictor>,
) -> Vec<(String, f64)> {
    let mut selected: Vec<(String, f64)> = Vec::with_capacity(top_k.min(remaining.len()));

    while selected.len() < top_k && !remaining.is_empty() {
        let context: Vec<String> = selected.iter().map(|(id, _)| id.clone()).collect();
        let mut best: Option<(usize, f64)> = None;

        for (idx, candidate) in remaining.iter().enumerate() {
            let score = match predictor {
                Some(p) => p.adjust_in_context(&candidate.expert_id, candidate.base_score, &context),
                None => candidate.base_score,
            };
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) => {
                let candidate = remaining.remove(idx);
                selected.push((candidate.expert_id, score));
            }
            None => break,
        }
    }

    selected
}

/// Numerically stable softmax
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::embedding::HashingEmbedder;

    fn gatekeeper() -> Gatekeeper {
        Gatekeeper::new(Arc::new(HashingEmbedder::default()), 16)
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let w = softmax(&[0.9, 0.3, 0.1]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(w[0] > w[1] && w[1] > w[2]);
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn test_cache_key_bounds_prompt_and_orders_exclusions() {
        let long = "x".repeat(CACHE_KEY_PREFIX_CHARS + 50);
        let longer = format!("{}tail", long);
        let excluded_a: HashSet<String> = ["b", "a"].iter().map(|s| s.to_string()).collect();
        let excluded_b: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(cache_key(&long, 1, &excluded_a), cache_key(&longer, 1, &excluded_b));
        assert_ne!(cache_key(&long, 1, &excluded_a), cache_key(&long, 2, &excluded_a));
    }

    #[tokio::test]
    async fn test_route_without_experts_fails() {
        let gk = gatekeeper();
        assert_eq!(gk.route("anything", 1).await.unwrap_err(), RoutingError::NoExperts);
        assert_eq!(gk.route("anything", 0).await.unwrap_err(), RoutingError::InvalidTopK);
    }

    #[tokio::test]
    async fn test_ties_break_by_registration_order() {
        let gk = gatekeeper();
        gk.register_expert(ExpertProfile::new("first", ["same"]).with_specialization(vec![1.0, 0.0]));
        gk.register_expert(ExpertProfile::new("second", ["same"]).with_specialization(vec![1.0, 0.0]));

        let decision = gk.route("unrelated words", 2).await.unwrap();
        assert_eq!(decision.selected_experts, vec!["first", "second"]);
        assert!((decision.routing_weights[0] - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_exclusions_are_respected() {
        let gk = gatekeeper();
        gk.register_expert(ExpertProfile::new("a", ["x"]));
        gk.register_expert(ExpertProfile::new("b", ["x"]));

        let excluded: HashSet<String> = ["a".to_string()].into();
        let decision = gk.route_for_task(Some("t"), "x", 2, &excluded).await.unwrap();
        assert_eq!(decision.selected_experts, vec!["b"]);
        assert_eq!(decision.task_id, "t");

        let all: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        assert_eq!(
            gk.route_for_task(None, "x", 1, &all).await.unwrap_err(),
            RoutingError::NoEligibleExperts(2)
        );
    }

    #[tokio::test]
    async fn test_missing_vectors_are_derived_and_persisted() {
        let gk = gatekeeper();
        gk.register_expert(ExpertProfile::new("coder", ["coding"]));
        assert!(gk.get_expert("coder").unwrap().specialization_vector.is_none());

        gk.route("coding", 1).await.unwrap();
        assert!(gk.get_expert("coder").unwrap().specialization_vector.is_some());
    }

    #[tokio::test]
    async fn test_cache_is_bounded_without_eviction() {
        let gk = Gatekeeper::new(Arc::new(HashingEmbedder::default()), 2);
        gk.register_expert(ExpertProfile::new("a", ["x"]));

        let first = gk.route("one", 1).await.unwrap();
        gk.route("two", 1).await.unwrap();
        gk.route("three", 1).await.unwrap();
        assert_eq!(gk.cache_len(), 2);

        let again = gk.route("one", 1).await.unwrap();
        assert_eq!(again.selected_experts, first.selected_experts);
        assert_eq!(again.routing_weights, first.routing_weights);
    }

    #[tokio::test]
    async fn test_cache_hits_get_their_own_task_ids() {
        let audit = Arc::new(AuditLogger::default());
        let gk = gatekeeper().with_audit(audit.clone());
        gk.register_expert(ExpertProfile::new("a", ["x"]));

        let first = gk.route("x", 1).await.unwrap();
        let second = gk.route("x", 1).await.unwrap();
        assert_ne!(first.task_id, second.task_id);
        assert_eq!(audit.get_trail(&first.task_id).len(), 1);
        assert_eq!(audit.get_trail(&second.task_id).len(), 1);
        assert_eq!(audit.get_trail(&second.task_id)[0].raw_data["cache_hit"], true);
    }

    #[tokio::test]
    async fn test_predictor_mutation_invalidates_cached_decisions() {
        let gk = gatekeeper();
        gk.register_expert(ExpertProfile::new("a", ["ops"]));
        gk.register_expert(ExpertProfile::new("b", ["ops"]));
        let predictor = Arc::new(RewardPredictor::new());
        gk.set_reward_predictor(Some(predictor.clone()));

        assert_eq!(gk.route("ops", 1).await.unwrap().primary(), Some("a"));
        assert_eq!(gk.cache_len(), 1);

        predictor.merge_top_experts(&["b".to_string()]);
        predictor.refresh_biases();
        assert_eq!(gk.route("ops", 1).await.unwrap().primary(), Some("b"));
    }

    /// Embeds `"slow"` only after `release` is notified
    struct GatedSimilarity {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl SimilarityService for GatedSimilarity {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::domain::similarity::SimilarityError> {
            if text == "slow" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn test_decision_racing_a_registration_is_not_cached() {
        let similarity = Arc::new(GatedSimilarity {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let gk = Arc::new(Gatekeeper::new(similarity.clone(), 16));
        gk.register_expert(ExpertProfile::new("old", ["x"]).with_specialization(vec![0.0, 1.0]));

        let routing = tokio::spawn({
            let gk = gk.clone();
            async move { gk.route("slow", 1).await }
        });
        similarity.entered.notified().await;
        gk.register_expert(ExpertProfile::new("new", ["x"]).with_specialization(vec![1.0, 0.0]));
        similarity.release.notify_one();

        let stale = routing.await.unwrap().unwrap();
        assert_eq!(stale.primary(), Some("old"));
        assert_eq!(gk.cache_len(), 0);

        let fresh = gk.route("slow", 1);
        similarity.release.notify_one();
        assert_eq!(fresh.await.unwrap().primary(), Some("new"));
    }

    #[test]
    fn test_adjust_performance_reads_and_writes_atomically() {
        let gk = Arc::new(gatekeeper());
        gk.register_expert(ExpertProfile::new("e", ["x"]).with_performance(0.5));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let gk = gk.clone();
                std::thread::spawn(move || {
                    gk.adjust_expert_performance("e", |current| 0.5 * current + 0.5 * 1.0)
                })
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap().is_some());
        }

        let expected = 1.0 - 0.5f64.powi(9);
        assert!((gk.get_expert("e").unwrap().performance_score - expected).abs() < 1e-12);
        assert_eq!(gk.adjust_expert_performance("ghost", |s| s), None);
    }

    #[test]
    fn test_unknown_score_update_is_skipped() {
        let gk = gatekeeper();
        assert_eq!(gk.update_expert_performance("ghost", 0.5), None);
    }

    #[test]
    fn test_replica_count() {
        let gk = gatekeeper();
        let master = ExpertProfile::new("m", ["x"]);
        gk.register_expert(master.clone());
        gk.register_expert(master.replicate("m_replica_1"));
        assert_eq!(ExpertDirectory::replica_count(&gk, "m"), 1);
        assert_eq!(ExpertDirectory::replica_count(&gk, "other"), 0);
    }
}
