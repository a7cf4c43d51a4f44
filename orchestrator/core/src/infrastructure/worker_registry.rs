// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Worker Registry - Expert Id to Worker Handle Resolution
//
// Maps expert ids to the worker handles that execute their prompts and wraps
// every dispatch in a per-call timeout. Timeouts are the only cancellation
// primitive; a timed-out worker future is dropped.

use crate::domain::worker::{Worker, WorkerError, WorkerResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry for managing worker handles
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the worker behind `expert_id`
    pub fn register(&self, expert_id: impl Into<String>, worker: Arc<dyn Worker>) {
        let expert_id = expert_id.into();
        info!("Registering worker for expert '{}'", expert_id);
        if self.workers.write().insert(expert_id.clone(), worker).is_some() {
            debug!("Replaced existing worker for expert '{}'", expert_id);
        }
    }

    pub fn get(&self, expert_id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.read().get(expert_id).cloned()
    }

    pub fn contains(&self, expert_id: &str) -> bool {
        self.workers.read().contains_key(expert_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Dispatch `prompt` to the worker behind `expert_id`, bounded by `timeout`
    pub async fn dispatch(
        &self,
        expert_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<WorkerResponse, WorkerError> {
        let worker = self
            .get(expert_id)
            .ok_or_else(|| WorkerError::UnknownWorker(expert_id.to_string()))?;

        match tokio::time::timeout(timeout, worker.process(prompt)).await {
            Ok(Ok(response)) => {
                debug!(expert_id, "Worker dispatch succeeded");
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!(expert_id, "Worker dispatch failed: {}", e);
                metrics::counter!("hive_dispatch_failures_total", "reason" => e.kind()).increment(1);
                Err(e)
            }
            Err(_) => {
                let e = WorkerError::Timeout {
                    expert_id: expert_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                warn!(expert_id, "Worker dispatch timed out after {:?}", timeout);
                metrics::counter!("hive_dispatch_failures_total", "reason" => e.kind()).increment(1);
                Err(e)
            }
        }
    }

    /// Check health of all workers concurrently
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), WorkerError>> {
        let workers: Vec<(String, Arc<dyn Worker>)> = self
            .workers
            .read()
            .iter()
            .map(|(id, w)| (id.clone(), w.clone()))
            .collect();

        futures::future::join_all(workers.into_iter().map(|(id, worker)| async move {
            debug!("Health checking worker: {}", id);
            let result = worker.health_check().await;
            (id, result)
        }))
        .await
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        async fn process(&self, prompt: &str) -> Result<WorkerResponse, WorkerError> {
            Ok(WorkerResponse::new(format!("echo: {}", prompt), 0.9))
        }
    }

    struct StuckWorker;

    #[async_trait]
    impl Worker for StuckWorker {
        async fn process(&self, _prompt: &str) -> Result<WorkerResponse, WorkerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(WorkerResponse::new("late", 1.0))
        }

        async fn health_check(&self) -> Result<(), WorkerError> {
            Err(WorkerError::Failure("stuck".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_registered_worker() {
        let registry = WorkerRegistry::new();
        registry.register("echo", Arc::new(EchoWorker));

        let response = registry
            .dispatch("echo", "hi", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.content, "echo: hi");
        assert_eq!(registry.ids(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let registry = WorkerRegistry::new();
        registry.register("stuck", Arc::new(StuckWorker));

        let err = registry
            .dispatch("stuck", "hi", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let registry = WorkerRegistry::new();
        let err = registry
            .dispatch("ghost", "hi", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, WorkerError::UnknownWorker("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let registry = WorkerRegistry::new();
        registry.register("echo", Arc::new(EchoWorker));
        registry.register("stuck", Arc::new(StuckWorker));

        let results = registry.health_check_all().await;
        assert!(results["echo"].is_ok());
        assert!(results["stuck"].is_err());
    }

    struct SlowCheckWorker;

    #[async_trait]
    impl Worker for SlowCheckWorker {
        async fn process(&self, _prompt: &str) -> Result<WorkerResponse, WorkerError> {
            Ok(WorkerResponse::new("ok", 1.0))
        }

        async fn health_check(&self) -> Result<(), WorkerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_health_checks_run_concurrently() {
        let registry = WorkerRegistry::new();
        for i in 0..5 {
            registry.register(format!("slow-{}", i), Arc::new(SlowCheckWorker));
        }

        let started = std::time::Instant::now();
        let results = registry.health_check_all().await;
        assert_eq!(results.len(), 5);
        assert!(results.values().all(Result::is_ok));
        assert!(started.elapsed() < Duration::from_millis(800));
    }
}
