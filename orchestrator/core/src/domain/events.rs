// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    ExpertRegistered {
        expert_id: String,
        is_replica: bool,
        registered_at: DateTime<Utc>,
    },
    ExpertScoreUpdated {
        expert_id: String,
        old_score: f64,
        new_score: f64,
        updated_at: DateTime<Utc>,
    },
    ReplicaSpawned {
        master_id: String,
        replica_id: String,
        spawned_at: DateTime<Utc>,
    },
    ExpertHealthChanged {
        expert_id: String,
        healthy: bool,
        changed_at: DateTime<Utc>,
    },
    SpeculationResolved {
        task_id: String,
        accepted: bool,
        similarity: f64,
        resolved_at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: String,
        experts: Vec<String>,
        failed_over: bool,
        completed_at: DateTime<Utc>,
    },
    TaskExhausted {
        task_id: String,
        attempted: Vec<String>,
        exhausted_at: DateTime<Utc>,
    },
}

impl SwarmEvent {
    /// Task this event belongs to, for task-scoped subscriptions
    pub fn task_id(&self) -> Option<&str> {
        match self {
            SwarmEvent::SpeculationResolved { task_id, .. }
            | SwarmEvent::TaskCompleted { task_id, .. }
            | SwarmEvent::TaskExhausted { task_id, .. } => Some(task_id),
            SwarmEvent::ExpertRegistered { .. }
            | SwarmEvent::ExpertScoreUpdated { .. }
            | SwarmEvent::ReplicaSpawned { .. }
            | SwarmEvent::ExpertHealthChanged { .. } => None,
        }
    }
}
