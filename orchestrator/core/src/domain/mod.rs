// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, error taxonomy and the collaborator contracts
//! ([`worker::Worker`], [`similarity::SimilarityService`]).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types shared by every swarm component

pub mod audit;
pub mod config;
pub mod evaluation;
pub mod events;
pub mod expert;
pub mod fusion;
pub mod routing;
pub mod similarity;
pub mod speculative;
pub mod wisdom;
pub mod worker;
