// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Orchestrator
//!
//! Top-level façade. Owns the gatekeeper, the topology manager, the worker
//! registry and every consensus component, and drives each request through
//! `Routing → Dispatching → {Succeeded, FailedOver, Exhausted}`.
//!
//! ## Modes
//!
//! | Mode | Behaviour |
//! |------|-----------|
//! | `best_expert` | Route `top_k = 1`; on failure mark the expert unhealthy, exclude it and re-route, up to `1 + max_failover_retries` attempts |
//! | `mixture` | Route `top_k = N`; dispatch concurrently; fuse every success; fail only when all fail |
//! | `speculative` | Draft/verify with explicit ids or the best pair for a domain |
//!
//! Unhealthy experts are excluded from routing in every mode while a healthy
//! alternative exists. When none does, routing falls back to them so a
//! recovered expert can prove itself; only experts that already failed the
//! current request stay excluded. A successful dispatch marks an expert
//! healthy again.
//!
//! Replicas have no worker of their own; they dispatch through the nearest
//! ancestor that has one.

use crate::application::dedup::{QueryDeduplicator, Registration};
use crate::application::topology::TopologyManager;
use crate::domain::{DispatchFailure, ExecutionMode, ExecutionState, OrchestratorError, TaskOutcome};
use chrono::Utc;
use dashmap::DashMap;
use hive_core::application::evolution::EvolutionService;
use hive_core::application::fusion::WeightedFusion;
use hive_core::application::gatekeeper::Gatekeeper;
use hive_core::application::pairing::identify_pairs;
use hive_core::application::reward::RewardPredictor;
use hive_core::application::speculative::SpeculativeExecutor;
use hive_core::application::trace_synthesizer::TraceSynthesizer;
use hive_core::domain::audit::steps;
use hive_core::domain::config::SwarmConfig;
use hive_core::domain::evaluation::ExpertEvaluation;
use hive_core::domain::events::SwarmEvent;
use hive_core::domain::expert::{ExpertProfile, GENERAL_DOMAIN};
use hive_core::domain::routing::{MoERoutingDecision, RoutingError, UsageSink};
use hive_core::domain::similarity::SimilarityService;
use hive_core::domain::speculative::SpeculativeError;
use hive_core::domain::wisdom::SwarmWisdom;
use hive_core::domain::worker::{Worker, WorkerError, WorkerResponse};
use hive_core::infrastructure::audit_logger::AuditLogger;
use hive_core::infrastructure::event_bus::EventBus;
use hive_core::infrastructure::worker_registry::WorkerRegistry;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SwarmOrchestrator {
    config: SwarmConfig,
    gatekeeper: Arc<Gatekeeper>,
    topology: Arc<TopologyManager>,
    workers: Arc<WorkerRegistry>,
    fusion: WeightedFusion,
    speculative: Arc<SpeculativeExecutor>,
    evolution: EvolutionService,
    synthesizer: TraceSynthesizer,
    reward_predictor: Arc<RewardPredictor>,
    audit: Arc<AuditLogger>,
    event_bus: EventBus,
    health: DashMap<String, bool>,
    dedup: Option<Arc<QueryDeduplicator<TaskOutcome>>>,
    similarity: Arc<dyn SimilarityService>,
}

impl SwarmOrchestrator {
    pub fn new(
        config: SwarmConfig,
        similarity: Arc<dyn SimilarityService>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let event_bus = EventBus::with_default_capacity();

        let reward_predictor = Arc::new(RewardPredictor::new());
        let gatekeeper = Arc::new(
            Gatekeeper::new(similarity.clone(), config.routing_cache_max_size)
                .with_audit(audit.clone())
                .with_event_bus(event_bus.clone()),
        );
        gatekeeper.set_reward_predictor(Some(reward_predictor.clone()));

        let topology = Arc::new(
            TopologyManager::new(gatekeeper.clone(), config.clone_threshold)
                .with_event_bus(event_bus.clone()),
        );
        let sink: Arc<dyn UsageSink> = topology.clone();
        gatekeeper.attach_usage_sink(Arc::downgrade(&sink));

        let workers = Arc::new(WorkerRegistry::new());
        let fusion = WeightedFusion::new(Some(similarity.clone()), Some(audit.clone()));
        let speculative = Arc::new(
            SpeculativeExecutor::new(
                workers.clone(),
                similarity.clone(),
                config.similarity_threshold,
                config.dispatch_timeout(),
            )
            .with_audit(audit.clone())
            .with_event_bus(event_bus.clone()),
        );
        let evolution = EvolutionService::new(
            gatekeeper.clone(),
            config.learning_rate,
            config.evolution_history_limit,
        );
        let synthesizer = TraceSynthesizer::new(audit.clone());

        info!(
            clone_threshold = config.clone_threshold,
            routing_cache_max_size = config.routing_cache_max_size,
            "Swarm orchestrator initialized"
        );

        Self {
            config,
            gatekeeper,
            topology,
            workers,
            fusion,
            speculative,
            evolution,
            synthesizer,
            reward_predictor,
            audit,
            event_bus,
            health: DashMap::new(),
            dedup: None,
            similarity,
        }
    }

    /// Build with an audit logger configured from `config.audit`
    pub fn from_config(config: SwarmConfig, similarity: Arc<dyn SimilarityService>) -> Self {
        let mut audit = AuditLogger::new(config.audit.retention());
        if let Some(path) = &config.audit.persist_path {
            audit = audit.with_persistence(path.clone());
        }
        Self::new(config, similarity, Arc::new(audit))
    }

    /// Join concurrent equivalent requests onto one computation
    pub fn with_deduplication(mut self) -> Self {
        self.dedup = Some(Arc::new(QueryDeduplicator::new(
            self.similarity.clone(),
            self.config.dedup_threshold,
            self.config.dedup_cache_ttl(),
            self.config.dedup_cache_capacity,
        )));
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.workers
    }

    pub fn speculative(&self) -> &Arc<SpeculativeExecutor> {
        &self.speculative
    }

    pub fn reward_predictor(&self) -> &Arc<RewardPredictor> {
        &self.reward_predictor
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn deduplicator(&self) -> Option<&Arc<QueryDeduplicator<TaskOutcome>>> {
        self.dedup.as_ref()
    }

    /// Register an expert and the worker that serves it
    pub fn register_expert(&self, profile: ExpertProfile, worker: Arc<dyn Worker>) {
        let expert_id = profile.agent_id.clone();
        self.workers.register(expert_id.clone(), worker);
        self.health.insert(expert_id, true);
        self.gatekeeper.register_expert(profile);
    }

    /// Health flag for `expert_id`; `None` until the expert is registered or dispatched
    pub fn expert_health(&self, expert_id: &str) -> Option<bool> {
        self.health.get(expert_id).map(|h| *h)
    }

    /// Mark `expert_id` healthy so routing considers it again
    pub fn reset_health(&self, expert_id: &str) {
        self.set_health(expert_id, true);
    }

    /// Run every worker's health check and record the results
    pub async fn refresh_health(&self) -> usize {
        let results = self.workers.health_check_all().await;
        let mut unhealthy = 0;
        for (expert_id, result) in results {
            if let Err(e) = &result {
                warn!(expert_id = %expert_id, "Health check failed: {}", e);
                unhealthy += 1;
            }
            self.set_health(&expert_id, result.is_ok());
        }
        unhealthy
    }

    /// Feed an evaluation into the expert's score. Returns the new score.
    pub fn submit_evaluation(&self, evaluation: &ExpertEvaluation) -> Option<f64> {
        self.evolution.process(evaluation)
    }

    pub fn evolution(&self) -> &EvolutionService {
        &self.evolution
    }

    /// Mine the audit trails and load the result into the reward predictor
    pub fn synthesize_wisdom(&self) -> SwarmWisdom {
        let wisdom = self.synthesizer.synthesize_wisdom();
        self.reward_predictor.load_wisdom(wisdom.clone());
        self.gatekeeper.clear_cache();
        wisdom
    }

    /// Execute `task` under `mode`
    pub async fn execute_moe_task(
        &self,
        task: &str,
        mode: ExecutionMode,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let task_id = Uuid::new_v4().to_string();

        let Some(dedup) = &self.dedup else {
            return self.run(&task_id, task, &mode).await;
        };

        match dedup.register_guarded(&mode.scope_key(), task, &task_id).await {
            Registration::Follower(pending) => match pending.wait().await {
                Ok(outcome) => {
                    debug!(task_id = %task_id, leader = %outcome.task_id, "Served by deduplicated request");
                    Ok((*outcome).clone())
                }
                Err(e) => {
                    warn!(task_id = %task_id, "{}; computing independently", e);
                    self.run(&task_id, task, &mode).await
                }
            },
            Registration::Leader(guard) => {
                let outcome = self.run(&task_id, task, &mode).await?;
                guard.complete(outcome.clone());
                Ok(outcome)
            }
        }
    }

    async fn run(
        &self,
        task_id: &str,
        task: &str,
        mode: &ExecutionMode,
    ) -> Result<TaskOutcome, OrchestratorError> {
        debug!(task_id, mode = %mode, state = ?ExecutionState::Routing, "Task started");
        let result = match mode {
            ExecutionMode::BestExpert => self.run_best_expert(task_id, task).await,
            ExecutionMode::Mixture { top_k } => self.run_mixture(task_id, task, *top_k).await,
            ExecutionMode::Speculative {
                draft_id,
                target_id,
                domain,
            } => {
                self.run_speculative(
                    task_id,
                    task,
                    draft_id.as_deref(),
                    target_id.as_deref(),
                    domain.as_deref(),
                )
                .await
            }
        };

        match &result {
            Ok(outcome) => self.finish(outcome),
            Err(OrchestratorError::Exhausted { failures }) => {
                let attempted: Vec<String> = failures.iter().map(|f| f.expert_id.clone()).collect();
                self.audit.log(
                    task_id,
                    steps::TASK_EXHAUSTED,
                    format!("All {} attempts failed", attempted.len()),
                    json!({ "attempted": attempted, "failures": failures }),
                    0,
                );
                self.event_bus.publish(SwarmEvent::TaskExhausted {
                    task_id: task_id.to_string(),
                    attempted,
                    exhausted_at: Utc::now(),
                });
            }
            Err(e) => warn!(task_id, "Task failed: {}", e),
        }
        result
    }

    async fn run_best_expert(&self, task_id: &str, task: &str) -> Result<TaskOutcome, OrchestratorError> {
        let max_attempts = 1 + self.config.max_failover_retries as usize;
        let mut failed: HashSet<String> = HashSet::new();
        let mut failures: Vec<DispatchFailure> = Vec::new();

        for attempt in 1..=max_attempts {
            let decision = match self.route_preferring_healthy(task_id, task, 1, &failed).await {
                Ok(d) => d,
                Err(RoutingError::NoEligibleExperts(_)) if !failures.is_empty() => break,
                Err(e) => return Err(e.into()),
            };
            let Some(expert_id) = decision.primary().map(str::to_string) else {
                break;
            };

            match self.dispatch(task_id, &expert_id, task, attempt).await {
                Ok(response) => {
                    return Ok(TaskOutcome {
                        task_id: task_id.to_string(),
                        content: response.content,
                        experts: vec![expert_id],
                        state: if failures.is_empty() {
                            ExecutionState::Succeeded
                        } else {
                            ExecutionState::FailedOver
                        },
                        consensus_score: None,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    self.audit.log(
                        task_id,
                        steps::FAILOVER,
                        format!("Expert {} failed, re-routing", expert_id),
                        json!({ "expert_id": expert_id, "reason": e.kind(), "attempt": attempt }),
                        0,
                    );
                    failures.push(DispatchFailure::new(expert_id.clone(), &e));
                    failed.insert(expert_id);
                }
            }
        }

        Err(OrchestratorError::Exhausted { failures })
    }

    async fn run_mixture(
        &self,
        task_id: &str,
        task: &str,
        top_k: usize,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let top_k = if top_k == 0 { self.config.mixture_top_k } else { top_k };
        let decision = self
            .route_preferring_healthy(task_id, task, top_k, &HashSet::new())
            .await?;

        let results = futures::future::join_all(decision.selected_experts.iter().map(|id| async move {
            (id.clone(), self.dispatch(task_id, id, task, 1).await)
        }))
        .await;

        let attempts = results.len();
        let mut outputs = Vec::new();
        let mut weights = Vec::new();
        let mut ids = Vec::new();
        let mut failures = Vec::new();
        for (expert_id, result) in results {
            match result {
                Ok(response) => {
                    weights.push(decision.weight_of(&expert_id).unwrap_or(0.0));
                    outputs.push(response.content);
                    ids.push(expert_id);
                }
                Err(e) => failures.push(DispatchFailure::new(expert_id, &e)),
            }
        }

        if outputs.is_empty() {
            return Err(OrchestratorError::Exhausted { failures });
        }

        let fused = self
            .fusion
            .fuse(task_id, &outputs, &weights, &ids, self.config.fusion_mode)
            .await?;

        Ok(TaskOutcome {
            task_id: task_id.to_string(),
            content: fused.merged_content,
            experts: ids,
            state: if failures.is_empty() {
                ExecutionState::Succeeded
            } else {
                ExecutionState::FailedOver
            },
            consensus_score: Some(fused.consensus_score),
            attempts,
        })
    }

    async fn run_speculative(
        &self,
        task_id: &str,
        task: &str,
        draft_id: Option<&str>,
        target_id: Option<&str>,
        domain: Option<&str>,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let (draft_id, target_id) = match (draft_id, target_id) {
            (Some(d), Some(t)) => (d.to_string(), t.to_string()),
            _ => {
                let domain = domain.unwrap_or(GENERAL_DOMAIN);
                let unhealthy = self.unhealthy_experts();
                let mut pairs = identify_pairs(&*self.gatekeeper, domain);
                let healthy = pairs.iter().position(|p| {
                    !unhealthy.contains(&p.drafter.agent_id) && !unhealthy.contains(&p.verifier.agent_id)
                });
                let pair = match healthy {
                    Some(idx) => pairs.swap_remove(idx),
                    None if !pairs.is_empty() => {
                        warn!(task_id, domain, "No healthy speculative pair, using an unhealthy one");
                        pairs.swap_remove(0)
                    }
                    None => return Err(OrchestratorError::NoSpeculativePair(domain.to_string())),
                };
                (pair.drafter.agent_id, pair.verifier.agent_id)
            }
        };

        debug!(task_id, draft_id = %draft_id, target_id = %target_id, state = ?ExecutionState::Dispatching, "Speculating");
        let draft_worker = self.worker_id_for(&draft_id);
        let target_worker = self.worker_id_for(&target_id);

        let outcome = match self
            .speculative
            .execute_for_task(task_id, task, &draft_worker, &target_worker)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    SpeculativeError::Draft { .. } => self.set_health(&draft_id, false),
                    SpeculativeError::Verifier { .. } => self.set_health(&target_id, false),
                    SpeculativeError::Similarity(_) => {}
                }
                return Err(e.into());
            }
        };

        self.set_health(&draft_id, true);
        self.set_health(&target_id, true);

        Ok(TaskOutcome {
            task_id: task_id.to_string(),
            content: outcome.final_content,
            experts: if outcome.accepted {
                vec![draft_id, target_id]
            } else {
                vec![target_id]
            },
            state: ExecutionState::Succeeded,
            consensus_score: Some(outcome.similarity),
            attempts: 2,
        })
    }

    async fn dispatch(
        &self,
        task_id: &str,
        expert_id: &str,
        task: &str,
        attempt: usize,
    ) -> Result<WorkerResponse, WorkerError> {
        let worker_id = self.worker_id_for(expert_id);
        let started = Instant::now();
        let result = self
            .workers
            .dispatch(&worker_id, task, self.config.dispatch_timeout())
            .await;

        self.audit.log(
            task_id,
            steps::DISPATCH,
            format!("Dispatched to {}", expert_id),
            json!({
                "expert_id": expert_id,
                "worker_id": worker_id,
                "attempt": attempt,
                "success": result.is_ok(),
                "error": result.as_ref().err().map(|e| e.kind()),
            }),
            started.elapsed().as_millis() as u64,
        );
        self.set_health(expert_id, result.is_ok());
        result
    }

    /// Nearest id in the replica ancestry that has a worker
    fn worker_id_for(&self, expert_id: &str) -> String {
        let mut current = expert_id.to_string();
        let mut seen = HashSet::new();
        while !self.workers.contains(&current) && seen.insert(current.clone()) {
            match self
                .gatekeeper
                .get_expert(&current)
                .and_then(|p| p.parent_id)
            {
                Some(parent) => current = parent,
                None => return expert_id.to_string(),
            }
        }
        current
    }

    /// Route around unhealthy experts and `failed`, falling back to the
    /// unhealthy ones when nothing else is eligible
    async fn route_preferring_healthy(
        &self,
        task_id: &str,
        task: &str,
        top_k: usize,
        failed: &HashSet<String>,
    ) -> Result<MoERoutingDecision, RoutingError> {
        let unhealthy = self.unhealthy_experts();
        let excluded: HashSet<String> = unhealthy.union(failed).cloned().collect();
        match self
            .gatekeeper
            .route_for_task(Some(task_id), task, top_k, &excluded)
            .await
        {
            Err(RoutingError::NoEligibleExperts(_)) if !unhealthy.is_subset(failed) => {
                warn!(
                    task_id,
                    unhealthy = unhealthy.len(),
                    "No healthy expert eligible, routing over unhealthy experts"
                );
                self.gatekeeper
                    .route_for_task(Some(task_id), task, top_k, failed)
                    .await
            }
            other => other,
        }
    }

    fn unhealthy_experts(&self) -> HashSet<String> {
        self.health
            .iter()
            .filter(|entry| !*entry.value())
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn set_health(&self, expert_id: &str, healthy: bool) {
        let previous = self.health.insert(expert_id.to_string(), healthy);
        if previous != Some(healthy) {
            if healthy {
                info!(expert_id, "Expert marked healthy");
            } else {
                warn!(expert_id, "Expert marked unhealthy");
            }
            self.event_bus.publish(SwarmEvent::ExpertHealthChanged {
                expert_id: expert_id.to_string(),
                healthy,
                changed_at: Utc::now(),
            });
        }
    }

    fn finish(&self, outcome: &TaskOutcome) {
        let failed_over = outcome.state == ExecutionState::FailedOver;
        self.audit.log(
            &outcome.task_id,
            steps::TASK_COMPLETED,
            format!("Completed by {}", outcome.experts.join(", ")),
            json!({
                "experts": outcome.experts,
                "state": outcome.state,
                "attempts": outcome.attempts,
                "consensus_score": outcome.consensus_score,
            }),
            0,
        );
        self.event_bus.publish(SwarmEvent::TaskCompleted {
            task_id: outcome.task_id.clone(),
            experts: outcome.experts.clone(),
            failed_over,
            completed_at: Utc::now(),
        });
        info!(task_id = %outcome.task_id, state = ?outcome.state, "Task finished");
    }
}
