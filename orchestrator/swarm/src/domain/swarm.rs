// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Request Types
//!
//! Defines the values that flow through one orchestrated request:
//!
//! - [`ExecutionMode`] - how a task is dispatched (single expert, mixture, speculative).
//! - [`ExecutionState`] - request state machine.
//! - [`TaskOutcome`] - what the caller gets back.
//! - [`OrchestratorError`] / [`DedupError`] - user-visible failures.
//!
//! ## State Machine
//!
//! ```text
//! Routing ──► Dispatching ──► Succeeded
//!                  │    └───► FailedOver   (succeeded after at least one failover)
//!                  └────────► Exhausted    (retry or candidate budget spent)
//! ```

use hive_core::domain::fusion::FusionError;
use hive_core::domain::routing::RoutingError;
use hive_core::domain::speculative::SpeculativeError;
use hive_core::domain::worker::WorkerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Route to the single best expert, failing over on error
    BestExpert,
    /// Fan out to the `top_k` best experts and fuse their answers
    Mixture { top_k: usize },
    /// Draft/verify with explicit ids, or a pair chosen for `domain`
    Speculative {
        draft_id: Option<String>,
        target_id: Option<String>,
        domain: Option<String>,
    },
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::BestExpert => "best_expert",
            ExecutionMode::Mixture { .. } => "mixture",
            ExecutionMode::Speculative { .. } => "speculative",
        }
    }

    /// Mode plus its parameters. Requests only share results within one key.
    pub fn scope_key(&self) -> String {
        match self {
            ExecutionMode::BestExpert => self.as_str().to_string(),
            ExecutionMode::Mixture { top_k } => format!("mixture:{}", top_k),
            ExecutionMode::Speculative {
                draft_id,
                target_id,
                domain,
            } => format!(
                "speculative:{}:{}:{}",
                draft_id.as_deref().unwrap_or(""),
                target_id.as_deref().unwrap_or(""),
                domain.as_deref().unwrap_or("")
            ),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    /// `mixture` parses with `top_k = 0`, meaning the configured default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best_expert" => Ok(ExecutionMode::BestExpert),
            "mixture" => Ok(ExecutionMode::Mixture { top_k: 0 }),
            "speculative" => Ok(ExecutionMode::Speculative {
                draft_id: None,
                target_id: None,
                domain: None,
            }),
            other => Err(format!("Unknown execution mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Routing,
    Dispatching,
    Succeeded,
    FailedOver,
    Exhausted,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::FailedOver | ExecutionState::Exhausted
        )
    }
}

/// Result of one orchestrated task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub content: String,
    /// Experts whose answers contributed, best first
    pub experts: Vec<String>,
    pub state: ExecutionState,
    /// Fusion consensus in mixture mode, verifier similarity in speculative mode
    pub consensus_score: Option<f64>,
    /// Dispatches attempted, including failed ones
    pub attempts: usize,
}

/// One failed dispatch, kept for the aggregate error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub expert_id: String,
    pub error: String,
}

impl DispatchFailure {
    pub fn new(expert_id: impl Into<String>, error: &WorkerError) -> Self {
        Self {
            expert_id: expert_id.into(),
            error: error.to_string(),
        }
    }
}

fn describe(failures: &[DispatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.expert_id, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingError),

    #[error("All {} dispatch attempts failed: {}", .failures.len(), describe(.failures))]
    Exhausted { failures: Vec<DispatchFailure> },

    #[error("Fusion failed: {0}")]
    Fusion(#[from] FusionError),

    #[error("Speculative execution failed: {0}")]
    Speculative(#[from] SpeculativeError),

    #[error("No drafter/verifier pair available for domain '{0}'")]
    NoSpeculativePair(String),
}

impl OrchestratorError {
    /// Experts attempted before exhaustion, in attempt order
    pub fn attempted_experts(&self) -> Vec<&str> {
        match self {
            OrchestratorError::Exhausted { failures } => {
                failures.iter().map(|f| f.expert_id.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DedupError {
    #[error("The computation for task '{0}' was abandoned before completing")]
    Abandoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("best_expert".parse::<ExecutionMode>(), Ok(ExecutionMode::BestExpert));
        assert_eq!(
            "mixture".parse::<ExecutionMode>(),
            Ok(ExecutionMode::Mixture { top_k: 0 })
        );
        assert!(matches!(
            "speculative".parse::<ExecutionMode>(),
            Ok(ExecutionMode::Speculative { draft_id: None, .. })
        ));
        assert!("fastest".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_scope_key_separates_parameters() {
        assert_eq!(ExecutionMode::BestExpert.scope_key(), "best_expert");
        assert_ne!(
            ExecutionMode::Mixture { top_k: 2 }.scope_key(),
            ExecutionMode::Mixture { top_k: 3 }.scope_key()
        );
        let code = ExecutionMode::Speculative {
            draft_id: None,
            target_id: None,
            domain: Some("code".to_string()),
        };
        assert_eq!(code.scope_key(), "speculative:::code");
    }

    #[test]
    fn test_exhausted_error_lists_attempts() {
        let err = OrchestratorError::Exhausted {
            failures: vec![
                DispatchFailure::new("a", &WorkerError::Failure("boom".to_string())),
                DispatchFailure::new(
                    "b",
                    &WorkerError::Timeout {
                        expert_id: "b".to_string(),
                        timeout_ms: 10,
                    },
                ),
            ],
        };
        assert_eq!(err.attempted_experts(), vec!["a", "b"]);
        let message = err.to_string();
        assert!(message.contains("a: Worker failure: boom"));
        assert!(message.contains("timed out"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionState::Routing.is_terminal());
        assert!(!ExecutionState::Dispatching.is_terminal());
        assert!(ExecutionState::FailedOver.is_terminal());
    }
}
