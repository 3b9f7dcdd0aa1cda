//! In-memory vector index for semantic search
//!
//! Embeddings are small and SQLite holds the source of truth, so the index
//! is rebuilt from the database at open and kept in sync on every write.

use std::collections::HashMap;

use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

/// Brute-force cosine index over the live (non-superseded) records
pub struct VectorIndex {
    dimensions: usize,
    vectors: HashMap<Uuid, Vec<f32>>,
}

/// One similarity match
#[derive(Debug, Clone, Copy)]
pub struct SimilarityHit {
    pub id: Uuid,
    pub score: f32,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Insert or replace a vector
    pub fn upsert(&mut self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::invalid_input(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    /// Drop a vector from the index
    pub fn remove(&mut self, id: Uuid) {
        self.vectors.remove(&id);
    }

    /// IDs scoring at or above `min_score` against the query, best first
    pub fn search(&self, query: &[f32], min_score: f32, limit: usize) -> Vec<SimilarityHit> {
        let mut hits: Vec<SimilarityHit> = self
            .vectors
            .iter()
            .filter_map(|(id, vector)| {
                let score = cosine_similarity(query, vector);
                if score >= min_score {
                    Some(SimilarityHit { id: *id, score })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }
}
