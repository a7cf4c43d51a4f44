// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Local feature-hashing embedder.
//
// Lower-cased alphanumeric tokens are hashed into a fixed number of buckets
// and the resulting count vector is L2-normalised. Deterministic across runs
// and processes, with no model download. Good enough for lexical routing and
// duplicate detection; swap in a model-backed SimilarityService for semantics.

use crate::domain::similarity::{SimilarityError, SimilarityService};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, SimilarityError> {
        if dimensions == 0 {
            return Err(SimilarityError::InvalidInput(
                "embedding dimensions must be positive".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimensions as u64) as usize
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            vector[self.bucket(&token)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[async_trait]
impl SimilarityService for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SimilarityError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SimilarityError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}
