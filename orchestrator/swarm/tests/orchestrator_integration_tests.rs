// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the swarm orchestrator
//!
//! These tests drive complete requests through the façade:
//! 1. Self-healing failover in best-expert mode
//! 2. Partial and total failure in mixture mode
//! 3. Speculative execution via heterogeneous pairing
//! 4. Request deduplication and load-driven replica scaling

use async_trait::async_trait;
use hive_core::domain::config::SwarmConfig;
use hive_core::domain::expert::{AccelerationType, ExpertProfile};
use hive_core::domain::routing::ExpertDirectory;
use hive_core::domain::worker::{Worker, WorkerError, WorkerResponse};
use hive_core::infrastructure::audit_logger::AuditLogger;
use hive_core::infrastructure::embedding::HashingEmbedder;
use hive_core::domain::events::SwarmEvent;
use hive_swarm::application::SwarmOrchestrator;
use hive_swarm::domain::{ExecutionMode, ExecutionState, OrchestratorError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ReplyWorker {
    reply: &'static str,
    delay: Duration,
    calls: AtomicUsize,
}

impl ReplyWorker {
    fn new(reply: &'static str) -> Arc<Self> {
        Self::slow(reply, Duration::ZERO)
    }

    fn slow(reply: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ReplyWorker {
    async fn process(&self, _prompt: &str) -> Result<WorkerResponse, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(WorkerResponse::new(self.reply, 0.9))
    }
}

struct BrokenWorker;

#[async_trait]
impl Worker for BrokenWorker {
    async fn process(&self, _prompt: &str) -> Result<WorkerResponse, WorkerError> {
        Err(WorkerError::Failure("model unavailable".to_string()))
    }
}

/// Fails its first `failures` calls, then answers
struct RecoveringWorker {
    failures: usize,
    calls: AtomicUsize,
}

impl RecoveringWorker {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Worker for RecoveringWorker {
    async fn process(&self, _prompt: &str) -> Result<WorkerResponse, WorkerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(WorkerError::Failure("warming up".to_string()));
        }
        Ok(WorkerResponse::new("recovered", 0.8))
    }
}

fn config(timeout_sec: f64) -> SwarmConfig {
    SwarmConfig {
        dispatch_timeout_sec: timeout_sec,
        clone_threshold: 1_000,
        ..Default::default()
    }
}

fn orchestrator(config: SwarmConfig) -> SwarmOrchestrator {
    SwarmOrchestrator::new(
        config,
        Arc::new(HashingEmbedder::default()),
        Arc::new(AuditLogger::default()),
    )
}

#[tokio::test]
async fn test_best_expert_fails_over_from_timeout() {
    let swarm = orchestrator(config(0.05));
    swarm.register_expert(
        ExpertProfile::new("first", ["coding"]),
        ReplyWorker::slow("too late", Duration::from_secs(5)),
    );
    swarm.register_expert(ExpertProfile::new("second", ["coding"]), ReplyWorker::new("fixed it"));

    let outcome = swarm
        .execute_moe_task("fix the coding bug", ExecutionMode::BestExpert)
        .await
        .unwrap();

    assert_eq!(outcome.content, "fixed it");
    assert_eq!(outcome.experts, vec!["second"]);
    assert_eq!(outcome.state, ExecutionState::FailedOver);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(swarm.expert_health("first"), Some(false));
    assert_eq!(swarm.expert_health("second"), Some(true));

    let steps: Vec<String> = swarm
        .audit()
        .get_trail(&outcome.task_id)
        .into_iter()
        .map(|e| e.step)
        .collect();
    assert!(steps.contains(&"failover".to_string()));
    assert_eq!(steps.last().map(String::as_str), Some("task_completed"));
}

#[tokio::test]
async fn test_unhealthy_expert_is_skipped_until_reset() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(ExpertProfile::new("flaky", ["ops"]), Arc::new(BrokenWorker));
    let steady = ReplyWorker::new("ok");
    swarm.register_expert(ExpertProfile::new("steady", ["ops"]), steady.clone());

    swarm.execute_moe_task("ops task", ExecutionMode::BestExpert).await.unwrap();
    let outcome = swarm.execute_moe_task("ops task", ExecutionMode::BestExpert).await.unwrap();
    assert_eq!(outcome.state, ExecutionState::Succeeded);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(steady.calls(), 2);

    swarm.reset_health("flaky");
    assert_eq!(swarm.expert_health("flaky"), Some(true));
}

#[tokio::test]
async fn test_sole_unhealthy_expert_is_retried_on_next_request() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(ExpertProfile::new("only", ["ops"]), RecoveringWorker::new(1));

    let err = swarm.execute_moe_task("ops task", ExecutionMode::BestExpert).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Exhausted { .. }));
    assert_eq!(err.attempted_experts(), vec!["only"]);
    assert_eq!(swarm.expert_health("only"), Some(false));

    let outcome = swarm.execute_moe_task("ops task", ExecutionMode::BestExpert).await.unwrap();
    assert_eq!(outcome.content, "recovered");
    assert_eq!(outcome.state, ExecutionState::Succeeded);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(swarm.expert_health("only"), Some(true));
}

#[tokio::test]
async fn test_all_unhealthy_experts_still_serve_mixture_and_speculative() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(
        ExpertProfile::new("drafter", ["code"]).with_acceleration(AccelerationType::Int4Quant),
        RecoveringWorker::new(1),
    );
    swarm.register_expert(
        ExpertProfile::new("verifier", ["code"]).with_acceleration(AccelerationType::H100Tensor),
        RecoveringWorker::new(1),
    );

    let err = swarm
        .execute_moe_task("code task", ExecutionMode::Mixture { top_k: 2 })
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Exhausted { .. }));
    assert_eq!(swarm.expert_health("drafter"), Some(false));
    assert_eq!(swarm.expert_health("verifier"), Some(false));

    let outcome = swarm
        .execute_moe_task(
            "code task",
            ExecutionMode::Speculative {
                draft_id: None,
                target_id: None,
                domain: Some("code".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.content, "recovered");
    assert_eq!(swarm.expert_health("drafter"), Some(true));
    assert_eq!(swarm.expert_health("verifier"), Some(true));
}

#[tokio::test]
async fn test_best_expert_exhaustion_lists_all_attempts() {
    let swarm = orchestrator(SwarmConfig {
        max_failover_retries: 5,
        ..config(1.0)
    });
    let mut events = swarm.event_bus().subscribe();
    swarm.register_expert(ExpertProfile::new("a", ["x"]), Arc::new(BrokenWorker));
    swarm.register_expert(ExpertProfile::new("b", ["x"]), Arc::new(BrokenWorker));

    let err = swarm.execute_moe_task("x", ExecutionMode::BestExpert).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Exhausted { .. }));
    assert_eq!(err.attempted_experts(), vec!["a", "b"]);

    let mut exhausted = false;
    while let Ok(event) = events.try_recv() {
        if let SwarmEvent::TaskExhausted { attempted, .. } = event {
            assert_eq!(attempted, vec!["a", "b"]);
            exhausted = true;
        }
    }
    assert!(exhausted);
}

#[tokio::test]
async fn test_mixture_tolerates_partial_failure() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(ExpertProfile::new("a", ["math"]), ReplyWorker::new("42"));
    swarm.register_expert(ExpertProfile::new("b", ["math"]), Arc::new(BrokenWorker));
    swarm.register_expert(ExpertProfile::new("c", ["math"]), ReplyWorker::new("42"));

    let outcome = swarm
        .execute_moe_task("math question", ExecutionMode::Mixture { top_k: 3 })
        .await
        .unwrap();

    assert_eq!(outcome.content, "42");
    assert_eq!(outcome.experts, vec!["a", "c"]);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.state, ExecutionState::FailedOver);
    assert!((outcome.consensus_score.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(swarm.expert_health("b"), Some(false));
}

#[tokio::test]
async fn test_mixture_fails_only_when_all_fail() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(ExpertProfile::new("a", ["math"]), Arc::new(BrokenWorker));
    swarm.register_expert(ExpertProfile::new("b", ["math"]), Arc::new(BrokenWorker));

    let err = swarm
        .execute_moe_task("math", ExecutionMode::Mixture { top_k: 2 })
        .await
        .unwrap_err();
    assert_eq!(err.attempted_experts().len(), 2);
}

#[tokio::test]
async fn test_speculative_mode_uses_heterogeneous_pair() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(
        ExpertProfile::new("drafter", ["code"]).with_acceleration(AccelerationType::Int4Quant),
        ReplyWorker::new("let x = 1;"),
    );
    swarm.register_expert(
        ExpertProfile::new("verifier", ["general"]).with_acceleration(AccelerationType::H100Tensor),
        ReplyWorker::new("let x = 1;"),
    );

    let outcome = swarm
        .execute_moe_task(
            "declare x",
            ExecutionMode::Speculative {
                draft_id: None,
                target_id: None,
                domain: Some("code".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.content, "let x = 1;");
    assert_eq!(outcome.experts, vec!["drafter", "verifier"]);
    assert_eq!(swarm.speculative().stats().accepted, 1);

    let err = swarm
        .execute_moe_task(
            "declare y",
            ExecutionMode::Speculative {
                draft_id: None,
                target_id: None,
                domain: Some("poetry".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoSpeculativePair(d) if d == "poetry"));
}

#[tokio::test]
async fn test_concurrent_duplicates_share_one_dispatch() {
    let swarm = orchestrator(config(5.0)).with_deduplication();
    let worker = ReplyWorker::slow("shared answer", Duration::from_millis(50));
    swarm.register_expert(ExpertProfile::new("solo", ["general"]), worker.clone());

    let (first, second) = tokio::join!(
        swarm.execute_moe_task("explain ownership", ExecutionMode::BestExpert),
        swarm.execute_moe_task("Explain ownership", ExecutionMode::BestExpert),
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first, second);
    assert_eq!(worker.calls(), 1);
}

#[tokio::test]
async fn test_duplicates_in_different_modes_dispatch_separately() {
    let swarm = orchestrator(config(5.0)).with_deduplication();
    let worker = ReplyWorker::slow("answer", Duration::from_millis(50));
    swarm.register_expert(ExpertProfile::new("solo", ["general"]), worker.clone());

    let (single, mixture) = tokio::join!(
        swarm.execute_moe_task("explain ownership", ExecutionMode::BestExpert),
        swarm.execute_moe_task("explain ownership", ExecutionMode::Mixture { top_k: 1 }),
    );

    let (single, mixture) = (single.unwrap(), mixture.unwrap());
    assert_ne!(single.task_id, mixture.task_id);
    assert_eq!(single.consensus_score, None);
    assert!(mixture.consensus_score.is_some());
    assert_eq!(worker.calls(), 2);
}

#[tokio::test]
async fn test_replicas_spawn_under_load_and_dispatch_through_parent() {
    let swarm = orchestrator(SwarmConfig {
        clone_threshold: 2,
        ..config(1.0)
    });
    let worker = ReplyWorker::new("busy");
    swarm.register_expert(ExpertProfile::new("hot", ["search"]), worker.clone());

    for i in 0..4 {
        swarm
            .execute_moe_task(&format!("search query {}", i), ExecutionMode::BestExpert)
            .await
            .unwrap();
    }
    swarm.topology().quiesce().await;

    let directory: &dyn ExpertDirectory = &**swarm.gatekeeper();
    assert!(directory.replica_count("hot") >= 1);
    let replica = swarm.gatekeeper().get_expert("hot_replica_1").unwrap();
    assert_eq!(replica.parent_id.as_deref(), Some("hot"));

    // Replicas have no worker of their own
    for i in 0..4 {
        swarm
            .execute_moe_task(&format!("search again {}", i), ExecutionMode::Mixture { top_k: 2 })
            .await
            .unwrap();
    }
    assert_eq!(worker.calls(), 4 + 4 * 2);
}

#[tokio::test]
async fn test_synthesized_wisdom_reaches_reward_predictor() {
    let swarm = orchestrator(config(1.0));
    swarm.register_expert(ExpertProfile::new("a", ["data"]), ReplyWorker::new("same"));
    swarm.register_expert(ExpertProfile::new("b", ["data"]), ReplyWorker::new("same"));

    swarm
        .execute_moe_task("data pipeline", ExecutionMode::Mixture { top_k: 2 })
        .await
        .unwrap();

    let wisdom = swarm.synthesize_wisdom();
    assert_eq!(wisdom.tasks_analyzed, 1);
    assert_eq!(swarm.reward_predictor().wisdom(), wisdom);
    assert!(swarm.reward_predictor().adjust("a", 1.0) > 1.0);
}

#[tokio::test]
async fn test_replica_count_tracks_threshold_multiples() {
    use hive_core::application::gatekeeper::Gatekeeper;
    use hive_swarm::application::TopologyManager;

    let gatekeeper = Arc::new(Gatekeeper::new(Arc::new(HashingEmbedder::default()), 16));
    gatekeeper.register_expert(ExpertProfile::new("coder", ["coding"]));
    let topology = TopologyManager::new(gatekeeper.clone(), 5);

    for _ in 0..5 {
        topology.record_usage("coder");
    }
    topology.quiesce().await;
    assert_eq!(ExpertDirectory::replica_count(&*gatekeeper, "coder"), 1);

    for _ in 0..5 {
        topology.record_usage("coder");
    }
    topology.quiesce().await;
    assert_eq!(ExpertDirectory::replica_count(&*gatekeeper, "coder"), 2);

    let parents: Vec<_> = gatekeeper
        .experts()
        .into_iter()
        .filter(|e| e.is_replica)
        .map(|e| e.parent_id)
        .collect();
    assert_eq!(parents, vec![Some("coder".to_string()); 2]);
}

#[tokio::test]
async fn test_from_config_persists_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swarm-audit.jsonl");
    let mut config = config(1.0);
    config.audit.persist_path = Some(path.clone());
    config.audit.max_tasks = 10;

    let swarm = SwarmOrchestrator::from_config(config, Arc::new(HashingEmbedder::default()));
    swarm.register_expert(ExpertProfile::new("solo", ["general"]), ReplyWorker::new("done"));
    let outcome = swarm.execute_moe_task("anything", ExecutionMode::BestExpert).await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), swarm.audit().get_trail(&outcome.task_id).len());
    assert!(lines.iter().all(|l| l["task_id"] == outcome.task_id.as_str()));
    assert_eq!(lines.last().unwrap()["event_type"], "task_completed");
}
