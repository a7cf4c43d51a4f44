// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Query Deduplicator
//!
//! Joins concurrent equivalent requests onto one in-flight computation.
//! Every registration carries a scope (the execution mode and its
//! parameters); requests only ever share results within the same scope.
//!
//! ## Lookup Order
//!
//! 1. Exact scope and prompt hash in the recent-results cache → resolved immediately.
//! 2. An in-flight prompt in the same scope with similarity `>= threshold` → join its shared future.
//! 3. Otherwise the caller becomes the leader and must compute the result.
//!
//! ## Cancellation
//!
//! Joiners hold clones of a [`Shared`] future over a oneshot receiver; dropping
//! one never affects the leader or other joiners. Only the leader's
//! [`QueryDeduplicator::complete`] or [`QueryDeduplicator::abandon`] resolves
//! the joiners. A [`LeaderGuard`] abandons on drop, so a cancelled leader
//! releases its joiners with [`DedupError::Abandoned`].
//!
//! ## Locking
//!
//! Lock order is in-flight → recent. Completion moves the result into the
//! recent cache while still holding the in-flight lock, so a registration
//! never misses a result that has left the in-flight map.

use crate::domain::DedupError;
use futures::future::{BoxFuture, FutureExt, Shared};
use hive_core::domain::similarity::SimilarityService;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type SharedResult<R> = Shared<BoxFuture<'static, Result<Arc<R>, DedupError>>>;

struct InFlight<R: Send + Sync + 'static> {
    scope: String,
    prompt_hash: String,
    prompt: String,
    embedding: Option<Vec<f32>>,
    sender: oneshot::Sender<Arc<R>>,
    shared: SharedResult<R>,
    started_at: Instant,
}

/// A result the caller can await instead of computing it
pub enum PendingResult<R: Send + Sync + 'static> {
    /// Served from the recent-results cache
    Ready(Arc<R>),
    /// Joined onto another caller's in-flight computation
    Joined {
        leader_task_id: String,
        future: SharedResult<R>,
    },
}

impl<R: Send + Sync + 'static> PendingResult<R> {
    pub async fn wait(self) -> Result<Arc<R>, DedupError> {
        match self {
            PendingResult::Ready(result) => Ok(result),
            PendingResult::Joined { future, .. } => future.await,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PendingResult::Ready(_))
    }
}

/// Outcome of [`QueryDeduplicator::register_guarded`]
pub enum Registration<R: Send + Sync + 'static> {
    /// The caller must compute the result and complete the guard
    Leader(LeaderGuard<R>),
    /// The caller awaits an existing result
    Follower(PendingResult<R>),
}

/// Leadership of one in-flight computation. Abandons it when dropped uncompleted.
pub struct LeaderGuard<R: Send + Sync + 'static> {
    dedup: Arc<QueryDeduplicator<R>>,
    task_id: String,
    finished: bool,
}

impl<R: Send + Sync + 'static> LeaderGuard<R> {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Publish `result` to every joiner and the recent cache
    pub fn complete(mut self, result: R) -> Arc<R> {
        self.finished = true;
        let result = Arc::new(result);
        self.dedup.complete(&self.task_id, result.clone());
        result
    }

    /// Release joiners without a result
    pub fn abandon(mut self) {
        self.finished = true;
        self.dedup.abandon(&self.task_id);
    }
}

impl<R: Send + Sync + 'static> Drop for LeaderGuard<R> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(task_id = %self.task_id, "Leader dropped before completing, abandoning");
            self.dedup.abandon(&self.task_id);
        }
    }
}

pub struct QueryDeduplicator<R: Send + Sync + 'static> {
    similarity: Arc<dyn SimilarityService>,
    threshold: f64,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, InFlight<R>>>,
    recent: Mutex<LruCache<String, (Arc<R>, Instant)>>,
}

impl<R: Send + Sync + 'static> QueryDeduplicator<R> {
    pub fn new(
        similarity: Arc<dyn SimilarityService>,
        threshold: f64,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            similarity,
            threshold,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Register `prompt` in `scope` under `task_id`.
    ///
    /// Returns `None` when the caller is the leader and must compute the
    /// result, then call [`complete`](Self::complete) or [`abandon`](Self::abandon).
    pub async fn register(&self, scope: &str, prompt: &str, task_id: &str) -> Option<PendingResult<R>> {
        let prompt_hash = hash_prompt(scope, prompt);
        if let Some(result) = self.recent_result(&prompt_hash) {
            debug!(task_id, "Served from recent results");
            return Some(PendingResult::Ready(result));
        }

        let embedding = match self.similarity.embed(prompt).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(task_id, "Embedding failed, semantic join disabled for this request: {}", e);
                None
            }
        };

        let mut in_flight = self.in_flight.lock();

        if let Some(result) = self.recent_result(&prompt_hash) {
            return Some(PendingResult::Ready(result));
        }

        if let Some(leader_task_id) = self.find_match(&in_flight, task_id, scope, &prompt_hash, embedding.as_deref()) {
            let entry = &in_flight[&leader_task_id];
            metrics::counter!("hive_dedup_joins_total").increment(1);
            debug!(
                task_id,
                leader_task_id = %leader_task_id,
                leader_age_ms = entry.started_at.elapsed().as_millis() as u64,
                "Joined in-flight request"
            );
            return Some(PendingResult::Joined {
                future: entry.shared.clone(),
                leader_task_id,
            });
        }

        let (sender, receiver) = oneshot::channel::<Arc<R>>();
        let leader = task_id.to_string();
        let shared = receiver
            .map(move |r| r.map_err(|_| DedupError::Abandoned(leader)))
            .boxed()
            .shared();

        in_flight.insert(
            task_id.to_string(),
            InFlight {
                scope: scope.to_string(),
                prompt_hash,
                prompt: prompt.to_string(),
                embedding,
                sender,
                shared,
                started_at: Instant::now(),
            },
        );
        None
    }

    /// Register and wrap leadership in a guard that abandons on drop
    pub async fn register_guarded(
        self: &Arc<Self>,
        scope: &str,
        prompt: &str,
        task_id: &str,
    ) -> Registration<R> {
        match self.register(scope, prompt, task_id).await {
            Some(pending) => Registration::Follower(pending),
            None => Registration::Leader(LeaderGuard {
                dedup: Arc::clone(self),
                task_id: task_id.to_string(),
                finished: false,
            }),
        }
    }

    /// Resolve `task_id`'s joiners with `result` and cache it by prompt hash.
    ///
    /// Returns false when `task_id` was not in flight.
    pub fn complete(&self, task_id: &str, result: Arc<R>) -> bool {
        let entry = {
            let mut in_flight = self.in_flight.lock();
            let Some(entry) = in_flight.remove(task_id) else {
                debug!(task_id, "Completion for unknown in-flight task ignored");
                return false;
            };
            self.recent
                .lock()
                .put(entry.prompt_hash.clone(), (result.clone(), Instant::now()));
            entry
        };

        // No receiver left means nobody joined and the shared future was dropped
        let _ = entry.sender.send(result);
        debug!(
            task_id,
            elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
            "In-flight request completed"
        );
        true
    }

    /// Drop `task_id`'s in-flight entry; joiners observe [`DedupError::Abandoned`]
    pub fn abandon(&self, task_id: &str) -> bool {
        self.in_flight.lock().remove(task_id).is_some()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Prompts currently being computed, keyed by task id
    pub fn in_flight_prompts(&self) -> Vec<(String, String)> {
        self.in_flight
            .lock()
            .iter()
            .map(|(id, e)| (id.clone(), e.prompt.clone()))
            .collect()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.lock().len()
    }

    fn recent_result(&self, prompt_hash: &str) -> Option<Arc<R>> {
        let mut recent = self.recent.lock();
        match recent.get(prompt_hash) {
            Some((result, stored_at)) if stored_at.elapsed() <= self.ttl => Some(result.clone()),
            Some(_) => {
                recent.pop(prompt_hash);
                None
            }
            None => None,
        }
    }

    fn find_match(
        &self,
        in_flight: &HashMap<String, InFlight<R>>,
        task_id: &str,
        scope: &str,
        prompt_hash: &str,
        embedding: Option<&[f32]>,
    ) -> Option<String> {
        if in_flight.contains_key(task_id) {
            return Some(task_id.to_string());
        }
        if let Some((id, _)) = in_flight.iter().find(|(_, e)| e.prompt_hash == prompt_hash) {
            return Some(id.clone());
        }

        let embedding = embedding?;
        let mut best: Option<(&String, f64)> = None;
        for (id, entry) in in_flight.iter().filter(|(_, e)| e.scope == scope) {
            let Some(other) = entry.embedding.as_deref() else {
                continue;
            };
            let score = self.similarity.similarity(embedding, other);
            if score >= self.threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((id, score));
            }
        }
        best.map(|(id, _)| id.clone())
    }
}

fn hash_prompt(scope: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}
