// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Audit Logger
//!
//! Append-only per-task event trail, held in memory and optionally mirrored to
//! a JSON-lines file.
//!
//! ## Lifecycle
//!
//! The store is constructed with an [`AuditRetention`] policy. When a new task
//! would push the store past `max_tasks`, the oldest trail is dropped before
//! the new one is inserted. A cap of zero is treated as one. Age-based
//! pruning runs only when [`AuditLogger::prune`] is called.
//!
//! ## Failure Semantics
//!
//! File persistence failures are logged at `WARN` and swallowed. The in-memory
//! trail is always updated, so routing and dispatch never fail because of audit I/O.

use crate::domain::audit::{AuditRetention, SwarmAuditTrail};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Default)]
struct TrailStore {
    trails: HashMap<String, Vec<SwarmAuditTrail>>,
    /// Task ids in creation order
    order: VecDeque<String>,
}

pub struct AuditLogger {
    store: RwLock<TrailStore>,
    retention: AuditRetention,
    persist_path: Option<PathBuf>,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl AuditLogger {
    /// In-memory audit store
    pub fn new(mut retention: AuditRetention) -> Self {
        if retention.max_tasks == 0 {
            warn!("Audit retention max_tasks of 0 raised to 1");
            retention.max_tasks = 1;
        }
        Self {
            store: RwLock::new(TrailStore::default()),
            retention,
            persist_path: None,
            writer: Mutex::new(None),
        }
    }

    /// Mirror every entry to `path` as one JSON object per line.
    ///
    /// The file is opened lazily in append mode on first write.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    /// Append an entry to `task_id`'s trail and return it.
    ///
    /// `data` is stored as a map; a non-object value is wrapped under `"value"`.
    pub fn log(
        &self,
        task_id: &str,
        step: &str,
        description: impl Into<String>,
        data: serde_json::Value,
        duration_ms: u64,
    ) -> SwarmAuditTrail {
        let raw_data = match data {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            serde_json::Value::Null => HashMap::new(),
            other => HashMap::from([("value".to_string(), other)]),
        };

        let entry = SwarmAuditTrail {
            task_id: task_id.to_string(),
            step: step.to_string(),
            decision_summary: description.into(),
            raw_data,
            timestamp: Utc::now(),
            duration_ms,
        };

        {
            let mut store = self.store.write();
            if !store.trails.contains_key(task_id) {
                while store.order.len() >= self.retention.max_tasks {
                    let Some(oldest) = store.order.pop_front() else {
                        break;
                    };
                    store.trails.remove(&oldest);
                    debug!(task_id = %oldest, "Audit trail evicted by retention cap");
                }
                store.order.push_back(task_id.to_string());
            }
            store
                .trails
                .entry(task_id.to_string())
                .or_default()
                .push(entry.clone());
        }

        self.persist(&entry);
        entry
    }

    fn persist(&self, entry: &SwarmAuditTrail) {
        let Some(path) = &self.persist_path else {
            return;
        };

        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize audit entry for task {}: {}", entry.task_id, e);
                metrics::counter!("hive_audit_persist_failures_total").increment(1);
                return;
            }
        };

        let mut writer = self.writer.lock();
        if writer.is_none() {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => *writer = Some(BufWriter::new(file)),
                Err(e) => {
                    warn!("Failed to open audit log {:?}: {}", path, e);
                    metrics::counter!("hive_audit_persist_failures_total").increment(1);
                    return;
                }
            }
        }

        if let Some(w) = writer.as_mut() {
            let result = writeln!(w, "{}", line).and_then(|_| w.flush());
            if let Err(e) = result {
                warn!("Failed to append audit entry to {:?}: {}", path, e);
                metrics::counter!("hive_audit_persist_failures_total").increment(1);
                // Reopen on next write
                *writer = None;
            }
        }
    }

    /// Ordered trail for `task_id`; empty when unknown
    pub fn get_trail(&self, task_id: &str) -> Vec<SwarmAuditTrail> {
        self.store
            .read()
            .trails
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Task ids in creation order
    pub fn task_ids(&self) -> Vec<String> {
        self.store.read().order.iter().cloned().collect()
    }

    /// Copy of every trail, in task creation order
    pub fn snapshot(&self) -> Vec<(String, Vec<SwarmAuditTrail>)> {
        let store = self.store.read();
        store
            .order
            .iter()
            .filter_map(|id| store.trails.get(id).map(|t| (id.clone(), t.clone())))
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.store.read().trails.len()
    }

    /// Apply the retention policy. Returns the number of trails removed.
    pub fn prune(&self) -> usize {
        let mut store = self.store.write();
        let before = store.trails.len();

        if let Some(max_age) = self.retention.max_age {
            let max_age = chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(36_500));
            let cutoff = Utc::now() - max_age;
            let expired: Vec<String> = store
                .trails
                .iter()
                .filter(|(_, trail)| trail.last().map(|e| e.timestamp < cutoff).unwrap_or(true))
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                store.trails.remove(&id);
            }
        }

        while store.trails.len() > self.retention.max_tasks {
            match store.order.pop_front() {
                Some(oldest) => {
                    store.trails.remove(&oldest);
                }
                None => break,
            }
        }

        let TrailStore { trails, order } = &mut *store;
        order.retain(|id| trails.contains_key(id));

        before - store.trails.len()
    }

    /// Drop every in-memory trail. The persisted file is left untouched.
    pub fn clear(&self) {
        let mut store = self.store.write();
        store.trails.clear();
        store.order.clear();
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(AuditRetention::default())
    }
}
