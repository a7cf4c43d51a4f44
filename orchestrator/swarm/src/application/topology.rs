// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Topology Manager
//!
//! Counts per-expert usage and spawns a virtual replica every time an
//! expert's counter reaches `clone_threshold`.
//!
//! - The increment and the check-and-reset happen under one DashMap shard
//!   lock, so each threshold crossing triggers exactly one clone.
//! - Cloning runs on a [`TaskTracker`]; callers on the routing path never
//!   wait for it. [`TopologyManager::quiesce`] waits for outstanding clones.
//! - Replica ids are `"{master}_replica_{n+1}"` where `n` is the master's
//!   current replica count. Id derivation and registration are serialized.
//! - Usage of a replica counts toward its own counter, but its clones are
//!   taken from the root master.

use chrono::Utc;
use dashmap::DashMap;
use hive_core::domain::events::SwarmEvent;
use hive_core::domain::routing::{ExpertDirectory, UsageSink};
use hive_core::infrastructure::event_bus::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct ReplicaFactory {
    directory: Arc<dyn ExpertDirectory>,
    lock: Arc<Mutex<()>>,
    event_bus: Option<EventBus>,
}

impl ReplicaFactory {
    fn clone_expert(&self, expert_id: &str) -> Option<String> {
        let _guard = self.lock.lock();

        let Some(mut master) = self.directory.get_expert(expert_id) else {
            warn!(expert_id, "Clone requested for unknown expert, skipped");
            return None;
        };
        if master.is_replica {
            let Some(root) = master.parent_id.as_deref().and_then(|p| self.directory.get_expert(p))
            else {
                warn!(expert_id, "Replica has no registered master, clone skipped");
                return None;
            };
            master = root;
        }

        let count = self.directory.replica_count(&master.agent_id);
        let replica_id = format!("{}_replica_{}", master.agent_id, count + 1);
        self.directory.register_expert(master.replicate(replica_id.clone()));

        metrics::counter!("hive_replicas_spawned_total").increment(1);
        info!(master_id = %master.agent_id, replica_id = %replica_id, "Spawned expert replica");
        if let Some(bus) = &self.event_bus {
            bus.publish(SwarmEvent::ReplicaSpawned {
                master_id: master.agent_id.clone(),
                replica_id: replica_id.clone(),
                spawned_at: Utc::now(),
            });
        }
        Some(replica_id)
    }
}

pub struct TopologyManager {
    counters: DashMap<String, u64>,
    clone_threshold: u64,
    factory: ReplicaFactory,
    tracker: TaskTracker,
}

impl TopologyManager {
    pub fn new(directory: Arc<dyn ExpertDirectory>, clone_threshold: u64) -> Self {
        Self {
            counters: DashMap::new(),
            clone_threshold: clone_threshold.max(1),
            factory: ReplicaFactory {
                directory,
                lock: Arc::new(Mutex::new(())),
                event_bus: None,
            },
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.factory.event_bus = Some(event_bus);
        self
    }

    pub fn clone_threshold(&self) -> u64 {
        self.clone_threshold
    }

    /// Uses recorded for `expert_id` since its last clone
    pub fn usage_count(&self, expert_id: &str) -> u64 {
        self.counters.get(expert_id).map(|c| *c).unwrap_or(0)
    }

    /// Count one use of `expert_id`, spawning a clone when the threshold is hit
    pub fn record_usage(&self, expert_id: &str) {
        let triggered = {
            let mut counter = self.counters.entry(expert_id.to_string()).or_insert(0);
            *counter += 1;
            if *counter >= self.clone_threshold {
                *counter = 0;
                true
            } else {
                false
            }
        };

        if triggered {
            debug!(expert_id, "Clone threshold reached");
            self.spawn_clone(expert_id.to_string());
        }
    }

    /// Clone `expert_id` synchronously. Returns the replica id.
    pub fn clone_expert(&self, expert_id: &str) -> Option<String> {
        self.factory.clone_expert(expert_id)
    }

    /// Wait for every clone spawned so far
    pub async fn quiesce(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Clones spawned but not yet finished
    pub fn pending_clones(&self) -> usize {
        self.tracker.len()
    }

    fn spawn_clone(&self, expert_id: String) {
        let factory = self.factory.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.tracker.spawn_on(
                    async move {
                        factory.clone_expert(&expert_id);
                    },
                    &handle,
                );
            }
            Err(_) => {
                debug!(expert_id = %expert_id, "No async runtime, cloning inline");
                factory.clone_expert(&expert_id);
            }
        }
    }
}

impl UsageSink for TopologyManager {
    fn record_usage(&self, expert_id: &str) {
        TopologyManager::record_usage(self, expert_id)
    }
}
