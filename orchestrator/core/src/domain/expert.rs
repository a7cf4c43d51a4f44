// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Expert Profiles
//!
//! An expert is a registered worker profile with a domain affinity, a
//! performance track record and an optional specialization vector used for
//! semantic routing.
//!
//! ## Invariants
//!
//! - `agent_id` is the unique registry key.
//! - `performance_score` always lies in [`MIN_PERFORMANCE_SCORE`, `MAX_PERFORMANCE_SCORE`].
//! - Replicas carry `is_replica = true` and the id of the expert they were cloned from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MIN_PERFORMANCE_SCORE: f64 = 0.1;
pub const MAX_PERFORMANCE_SCORE: f64 = 1.0;

/// Domain tag matched by every domain query during pairing.
pub const GENERAL_DOMAIN: &str = "general";

/// Clamp a score into the legal performance range.
pub fn clamp_performance(score: f64) -> f64 {
    if score.is_nan() {
        return MIN_PERFORMANCE_SCORE;
    }
    score.clamp(MIN_PERFORMANCE_SCORE, MAX_PERFORMANCE_SCORE)
}

/// Hardware profile advertised by the worker behind an expert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelerationType {
    #[default]
    Standard,
    Fp8Bitnet,
    Int4Quant,
    H100Tensor,
}

impl AccelerationType {
    /// Routing multiplier: accelerated hardware gets a 20% boost.
    pub fn hardware_multiplier(&self) -> f64 {
        match self {
            AccelerationType::Standard => 1.0,
            AccelerationType::Fp8Bitnet
            | AccelerationType::Int4Quant
            | AccelerationType::H100Tensor => 1.2,
        }
    }

    /// Quantized workers are fast but approximate: good draft producers.
    pub fn is_drafter(&self) -> bool {
        matches!(self, AccelerationType::Fp8Bitnet | AccelerationType::Int4Quant)
    }

    /// Full-precision workers verify drafts.
    pub fn is_verifier(&self) -> bool {
        matches!(self, AccelerationType::H100Tensor | AccelerationType::Standard)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertProfile {
    /// Unique expert identifier
    pub agent_id: String,

    /// Domain tags this expert is specialised in
    pub domains: BTreeSet<String>,

    /// Track record in [0.1, 1.0]
    pub performance_score: f64,

    /// Embedding of the expert's specialization; derived from the domains when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization_vector: Option<Vec<f32>>,

    #[serde(default)]
    pub acceleration_type: AccelerationType,

    #[serde(default)]
    pub is_replica: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl ExpertProfile {
    pub fn new<I, S>(agent_id: impl Into<String>, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent_id: agent_id.into(),
            domains: domains.into_iter().map(Into::into).collect(),
            performance_score: MAX_PERFORMANCE_SCORE,
            specialization_vector: None,
            acceleration_type: AccelerationType::Standard,
            is_replica: false,
            parent_id: None,
        }
    }

    pub fn with_performance(mut self, score: f64) -> Self {
        self.performance_score = clamp_performance(score);
        self
    }

    pub fn with_specialization(mut self, vector: Vec<f32>) -> Self {
        self.specialization_vector = Some(vector);
        self
    }

    pub fn with_acceleration(mut self, acceleration: AccelerationType) -> Self {
        self.acceleration_type = acceleration;
        self
    }

    /// Build a replica of this expert under a new id.
    ///
    /// Domains, score, hardware and specialization vector are copied.
    pub fn replicate(&self, replica_id: impl Into<String>) -> Self {
        Self {
            agent_id: replica_id.into(),
            domains: self.domains.clone(),
            performance_score: self.performance_score,
            specialization_vector: self.specialization_vector.clone(),
            acceleration_type: self.acceleration_type,
            is_replica: true,
            parent_id: Some(self.agent_id.clone()),
        }
    }

    /// Text used to derive a specialization vector when none was supplied.
    pub fn domain_seed(&self) -> String {
        if self.domains.is_empty() {
            return self.agent_id.clone();
        }
        self.domains.iter().cloned().collect::<Vec<_>>().join(" ")
    }

    /// Primary domain tag (lexicographically first), if any
    pub fn primary_domain(&self) -> Option<&str> {
        self.domains.iter().next().map(String::as_str)
    }

    /// Whether this expert serves `domain`, either directly or via the general tag
    pub fn serves_domain(&self, domain: &str) -> bool {
        self.domains.contains(domain) || self.domains.contains(GENERAL_DOMAIN)
    }
}
