// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod gatekeeper;
pub mod fusion;
pub mod speculative;
pub mod pairing;
pub mod reward;
pub mod trace_synthesizer;
pub mod evolution;
pub mod knowledge_bridge;

// Re-export services for convenience
pub use evolution::EvolutionService;
pub use fusion::WeightedFusion;
pub use gatekeeper::Gatekeeper;
pub use knowledge_bridge::TenantKnowledgeBridge;
pub use pairing::{identify_pairs, SpeculativePair};
pub use reward::RewardPredictor;
pub use speculative::SpeculativeExecutor;
pub use trace_synthesizer::TraceSynthesizer;
