// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit_logger;
pub mod embedding;
pub mod event_bus;
pub mod telemetry;
pub mod worker_registry;

pub use audit_logger::AuditLogger;
pub use embedding::HashingEmbedder;
pub use event_bus::EventBus;
pub use worker_registry::WorkerRegistry;
