// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Speculative Executor
//!
//! Runs a fast draft expert, then an accurate verifier that sees the draft.
//! The draft is accepted when the two answers are similar enough; otherwise
//! the verifier's answer replaces it.
//!
//! ```text
//! draft.process(task) ──► proposal ──► verifier.process(task + draft)
//!                                              │
//!                        similarity(draft, verified) >= threshold ?
//!                               accept draft  /  roll back to verifier
//! ```
//!
//! [`SpeculativeExecutor::execute_streaming`] exposes the same cycle as a
//! bounded channel of [`SpeculativeChunk`]s.

use crate::domain::audit::steps;
use crate::domain::events::SwarmEvent;
use crate::domain::similarity::SimilarityService;
use crate::domain::speculative::{
    SpeculationStats, SpeculativeChunk, SpeculativeError, SpeculativeProposal, VerificationOutcome,
};
use crate::infrastructure::audit_logger::AuditLogger;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::worker_registry::WorkerRegistry;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Words per streamed draft chunk
pub const DRAFT_CHUNK_WORDS: usize = 4;

pub struct SpeculativeExecutor {
    workers: Arc<WorkerRegistry>,
    similarity: Arc<dyn SimilarityService>,
    threshold: f64,
    timeout: Duration,
    total: AtomicU64,
    accepted: AtomicU64,
    audit: Option<Arc<AuditLogger>>,
    event_bus: Option<EventBus>,
}

impl SpeculativeExecutor {
    pub fn new(
        workers: Arc<WorkerRegistry>,
        similarity: Arc<dyn SimilarityService>,
        threshold: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            workers,
            similarity,
            threshold,
            timeout,
            total: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            audit: None,
            event_bus: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn stats(&self) -> SpeculationStats {
        let total = self.total.load(Ordering::Acquire);
        let accepted = self.accepted.load(Ordering::Acquire);
        SpeculationStats {
            total,
            accepted,
            acceptance_rate: if total == 0 {
                0.0
            } else {
                accepted as f64 / total as f64
            },
        }
    }

    /// Run one draft/verify cycle under a fresh task id
    pub async fn execute(
        &self,
        task: &str,
        draft_id: &str,
        target_id: &str,
    ) -> Result<VerificationOutcome, SpeculativeError> {
        let task_id = Uuid::new_v4().to_string();
        self.execute_for_task(&task_id, task, draft_id, target_id).await
    }

    /// Run one draft/verify cycle, auditing under `task_id`
    pub async fn execute_for_task(
        &self,
        task_id: &str,
        task: &str,
        draft_id: &str,
        target_id: &str,
    ) -> Result<VerificationOutcome, SpeculativeError> {
        let started = Instant::now();
        let proposal = self.draft(task, draft_id).await?;
        self.verify(task_id, task, &proposal, target_id, started).await
    }

    /// Stream a draft/verify cycle.
    ///
    /// The full cycle runs and its statistics are committed before anything is
    /// sent, so a slow or idle consumer never holds up the bookkeeping. The
    /// channel then carries the draft chunks followed by either one
    /// `VerifiedChunk` with the accepted draft, or a `Rollback` and the
    /// verifier's `VerifiedChunk`. When either worker fails the channel closes
    /// with nothing sent.
    pub fn execute_streaming(
        self: &Arc<Self>,
        task: impl Into<String>,
        draft_id: impl Into<String>,
        target_id: impl Into<String>,
        capacity: usize,
    ) -> mpsc::Receiver<SpeculativeChunk> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let executor = Arc::clone(self);
        let task = task.into();
        let draft_id = draft_id.into();
        let target_id = target_id.into();

        tokio::spawn(async move {
            let task_id = Uuid::new_v4().to_string();
            let started = Instant::now();

            let cycle = async {
                let proposal = executor.draft(&task, &draft_id).await?;
                let outcome = executor
                    .verify(&task_id, &task, &proposal, &target_id, started)
                    .await?;
                Ok::<_, SpeculativeError>((proposal, outcome))
            };
            let (proposal, outcome) = match cycle.await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Streaming speculation aborted: {}", e);
                    return;
                }
            };

            let mut streamed_len = 0usize;
            for chunk in draft_chunks(&proposal.content) {
                let len = chunk.chars().count();
                if tx.send(SpeculativeChunk::DraftChunk { text: chunk }).await.is_err() {
                    debug!("Speculation consumer went away during draft streaming");
                    return;
                }
                streamed_len += len;
            }

            if !outcome.accepted
                && tx
                    .send(SpeculativeChunk::Rollback {
                        discarded_len: streamed_len,
                    })
                    .await
                    .is_err()
            {
                return;
            }
            let _ = tx
                .send(SpeculativeChunk::VerifiedChunk {
                    text: outcome.final_content,
                })
                .await;
        });

        rx
    }

    async fn draft(&self, task: &str, draft_id: &str) -> Result<SpeculativeProposal, SpeculativeError> {
        let response = self
            .workers
            .dispatch(draft_id, task, self.timeout)
            .await
            .map_err(|source| SpeculativeError::Draft {
                expert_id: draft_id.to_string(),
                source,
            })?;

        Ok(SpeculativeProposal {
            content: response.content,
            confidence: response.confidence,
            proposer_id: draft_id.to_string(),
        })
    }

    async fn verify(
        &self,
        task_id: &str,
        task: &str,
        proposal: &SpeculativeProposal,
        target_id: &str,
        started: Instant,
    ) -> Result<VerificationOutcome, SpeculativeError> {
        let prompt = verifier_prompt(task, &proposal.content);
        let verified = self
            .workers
            .dispatch(target_id, &prompt, self.timeout)
            .await
            .map_err(|source| SpeculativeError::Verifier {
                expert_id: target_id.to_string(),
                source,
            })?;
        let latency_delta_ms = started.elapsed().as_millis() as u64;

        let similarity = self
            .similarity
            .similarity_text(&proposal.content, &verified.content)
            .await?;
        let accepted = similarity >= self.threshold;

        let outcome = VerificationOutcome {
            accepted,
            final_content: if accepted {
                proposal.content.clone()
            } else {
                verified.content
            },
            accepted_length: if accepted {
                proposal.content.chars().count()
            } else {
                0
            },
            correction_applied: !accepted,
            verifier_id: target_id.to_string(),
            latency_delta_ms,
            similarity,
        };

        self.record(task_id, proposal, &outcome);
        Ok(outcome)
    }

    fn record(&self, task_id: &str, proposal: &SpeculativeProposal, outcome: &VerificationOutcome) {
        self.total.fetch_add(1, Ordering::AcqRel);
        if outcome.accepted {
            self.accepted.fetch_add(1, Ordering::AcqRel);
        }
        metrics::counter!(
            "hive_speculation_total",
            "accepted" => if outcome.accepted { "true" } else { "false" }
        )
        .increment(1);

        info!(
            task_id,
            drafter = %proposal.proposer_id,
            verifier = %outcome.verifier_id,
            similarity = outcome.similarity,
            accepted = outcome.accepted,
            "Speculation resolved"
        );

        if let Some(audit) = &self.audit {
            audit.log(
                task_id,
                steps::SPECULATION,
                if outcome.accepted {
                    format!("Draft from {} accepted", proposal.proposer_id)
                } else {
                    format!("Draft from {} rolled back", proposal.proposer_id)
                },
                json!({
                    "draft_id": proposal.proposer_id,
                    "verifier_id": outcome.verifier_id,
                    "similarity": outcome.similarity,
                    "accepted": outcome.accepted,
                    "accepted_length": outcome.accepted_length,
                }),
                outcome.latency_delta_ms,
            );
        }

        if let Some(bus) = &self.event_bus {
            bus.publish(SwarmEvent::SpeculationResolved {
                task_id: task_id.to_string(),
                accepted: outcome.accepted,
                similarity: outcome.similarity,
                resolved_at: Utc::now(),
            });
        }
    }
}

fn verifier_prompt(task: &str, draft: &str) -> String {
    format!(
        "{}\n\nA draft answer was proposed:\n{}\n\nVerify the draft and respond with the correct final answer.",
        task, draft
    )
}

/// Split `content` into groups of [`DRAFT_CHUNK_WORDS`] words.
///
/// Concatenating the chunks reproduces `content` exactly.
fn draft_chunks(content: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut words = 0;
    for piece in content.split_inclusive(char::is_whitespace) {
        current.push_str(piece);
        if !piece.trim().is_empty() {
            words += 1;
        }
        if words == DRAFT_CHUNK_WORDS && piece.ends_with(char::is_whitespace) {
            chunks.push(std::mem::take(&mut current));
            words = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
