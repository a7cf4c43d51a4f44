// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit trail records.
//!
//! Entries are append-only and ordered by insertion per `task_id`. The JSON
//! line format written to disk is
//! `{task_id, event_type, description, data, timestamp, duration_ms}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Step tags emitted by the core
pub mod steps {
    pub const ROUTING_DECISION: &str = "routing_decision";
    pub const EXPERT_FUSION: &str = "expert_fusion";
    pub const DISPATCH: &str = "dispatch";
    pub const FAILOVER: &str = "failover";
    pub const SPECULATION: &str = "speculation";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const TASK_EXHAUSTED: &str = "task_exhausted";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmAuditTrail {
    pub task_id: String,

    /// Free-form step tag, see [`steps`]
    #[serde(rename = "event_type")]
    pub step: String,

    #[serde(rename = "description")]
    pub decision_summary: String,

    #[serde(rename = "data", default)]
    pub raw_data: HashMap<String, serde_json::Value>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub duration_ms: u64,
}

/// Lifecycle policy for the in-memory audit store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRetention {
    /// Trails kept before the oldest are pruned
    pub max_tasks: usize,

    /// Trails whose last entry is older than this are pruned
    #[serde(default)]
    pub max_age: Option<Duration>,
}

impl Default for AuditRetention {
    fn default() -> Self {
        Self {
            max_tasks: 10_000,
            max_age: None,
        }
    }
}
