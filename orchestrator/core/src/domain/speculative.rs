// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Speculative execution value objects.
//!
//! A fast drafter proposes, an accurate verifier checks. The outcome is
//! produced exactly once per speculative call.

use crate::domain::similarity::SimilarityError;
use crate::domain::worker::WorkerError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeculativeProposal {
    pub content: String,
    pub confidence: f64,
    pub proposer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub accepted: bool,

    /// Draft when accepted, verifier output otherwise
    pub final_content: String,

    /// Characters of the draft that survived verification
    pub accepted_length: usize,

    /// True when the verifier's answer replaced the draft
    pub correction_applied: bool,

    pub verifier_id: String,

    /// Verifier completion minus draft start
    pub latency_delta_ms: u64,

    pub similarity: f64,
}

/// Item on a streaming speculation channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeculativeChunk {
    /// Part of the draft, sent before verification is known
    DraftChunk { text: String },
    /// Confirmed content
    VerifiedChunk { text: String },
    /// The draft streamed so far must be discarded
    Rollback { discarded_len: usize },
}

/// Running acceptance counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeculationStats {
    pub total: u64,
    pub accepted: u64,
    pub acceptance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpeculativeError {
    #[error("Draft worker '{expert_id}' failed: {source}")]
    Draft { expert_id: String, source: WorkerError },

    #[error("Verifier '{expert_id}' failed: {source}")]
    Verifier { expert_id: String, source: WorkerError },

    #[error("Similarity backend failed: {0}")]
    Similarity(#[from] SimilarityError),
}
