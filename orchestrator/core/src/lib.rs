// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hive Core
//!
//! Routing, consensus and learning primitives for the expert swarm.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Gatekeeper routing, fusion, speculation, audit mining and
//!   score evolution, independent of any concrete worker or embedding backend

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
