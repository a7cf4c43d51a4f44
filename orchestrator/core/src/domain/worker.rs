// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker
//!
//! Domain interface for the opaque task processors that back each expert.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-corruption boundary between the swarm core and whatever
//!   actually computes an answer (an LLM call, a tool, a remote service).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Domain interface for expert workers.
///
/// The swarm core never looks inside a worker; it only needs a prompt in and
/// content out. Timeouts are imposed by the caller, not the worker.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Process a prompt and return the worker's answer
    async fn process(&self, prompt: &str) -> Result<WorkerResponse, WorkerError>;

    /// Check if the worker is healthy and reachable
    async fn health_check(&self) -> Result<(), WorkerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// Generated content
    pub content: String,

    /// Worker's own confidence in the answer (0.0-1.0)
    pub confidence: f64,
}

impl WorkerResponse {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            confidence,
        }
    }
}

/// Errors that can occur while dispatching to a worker
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker '{expert_id}' timed out after {timeout_ms}ms")]
    Timeout { expert_id: String, timeout_ms: u64 },

    #[error("Worker failure: {0}")]
    Failure(String),

    #[error("No worker registered for expert '{0}'")]
    UnknownWorker(String),
}

impl WorkerError {
    /// Short label used for metrics and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Timeout { .. } => "timeout",
            WorkerError::Failure(_) => "failure",
            WorkerError::UnknownWorker(_) => "unknown_worker",
        }
    }
}
