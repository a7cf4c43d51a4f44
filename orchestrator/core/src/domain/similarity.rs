// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Similarity Service Contract
//!
//! The embedding backend is an external collaborator. The core only needs
//! `embed(text) -> vector` and a similarity score in `[0, 1]`.
//!
//! The default `similarity` is cosine similarity clamped to `[0, 1]`;
//! implementations backed by a remote model may override any method.

use async_trait::async_trait;

#[async_trait]
pub trait SimilarityService: Send + Sync {
    /// Embed a single text into a dense vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SimilarityError>;

    /// Embed several texts; order of the output matches the input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SimilarityError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Similarity of two vectors in `[0, 1]`
    fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        cosine_similarity(a, b).clamp(0.0, 1.0)
    }

    /// Convenience form: embed both texts and compare
    async fn similarity_text(&self, a: &str, b: &str) -> Result<f64, SimilarityError> {
        if a == b {
            return Ok(1.0);
        }
        let va = self.embed(a).await?;
        let vb = self.embed(b).await?;
        Ok(self.similarity(&va, &vb))
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for empty, zero-norm, or dimension-mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimilarityError {
    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
