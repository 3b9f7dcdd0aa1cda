//! Blended ranking of retrieval candidates

use serde::{Deserialize, Serialize};

use crate::record::{MemoryRecord, MemoryState};

/// Weights and floors for retrieval ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Weight of semantic similarity in the blend
    pub similarity_weight: f64,

    /// Weight of current retrievability
    pub retrievability_weight: f64,

    /// Weight of situational-context overlap
    pub context_weight: f64,

    /// Weight of the importance score
    pub importance_weight: f64,

    /// Hard filter: Active records below this retrievability are excluded
    /// from normal results
    pub retrievability_floor: f64,

    /// Surfaced results at or above this blended score count as a recall
    /// and trigger a decay update
    pub usage_threshold: f64,

    /// Minimum cosine similarity for a record to be fetched as a candidate
    pub candidate_floor: f64,

    /// Dormant records matched at or above this similarity reactivate
    pub reactivation_similarity: f64,

    /// Cap on candidates pulled from the index per query
    pub max_candidates: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.45,
            retrievability_weight: 0.25,
            context_weight: 0.15,
            importance_weight: 0.15,
            retrievability_floor: 0.6,
            usage_threshold: 0.3,
            candidate_floor: 0.15,
            reactivation_similarity: 0.8,
            max_candidates: 256,
        }
    }
}

/// Per-candidate component scores computed before blending
#[derive(Debug, Clone, Copy)]
pub struct ComponentScores {
    pub similarity: f64,
    pub retrievability: f64,
    pub context: f64,
    pub importance: f64,
}

/// A record surfaced by retrieval with its blended and component scores
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub record: MemoryRecord,
    pub score: f64,
    pub similarity: f64,
    pub retrievability: f64,
    pub context_score: f64,
}

/// Ordered retrieval results
///
/// `stale_fallback` is set when no Active candidate cleared the
/// retrievability floor and the results instead come from below-floor or
/// dormant records.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub results: Vec<RankedMemory>,
    pub stale_fallback: bool,
}

/// Blends similarity, retrievability, context and importance into ranked
/// results
#[derive(Debug, Clone, Default)]
pub struct RetrievalRanker {
    config: RankerConfig,
}

impl RetrievalRanker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// The weighted blend of one candidate's component scores
    pub fn blend(&self, scores: &ComponentScores) -> f64 {
        let c = &self.config;
        c.similarity_weight * scores.similarity
            + c.retrievability_weight * scores.retrievability
            + c.context_weight * scores.context
            + c.importance_weight * scores.importance
    }

    /// Rank scored candidates. Active records above the retrievability
    /// floor form the normal result set; when none clear it, the best of
    /// the rest is returned tagged as a stale-dormant fallback. Superseded
    /// records are never ranked.
    pub fn rank(
        &self,
        scored: Vec<(MemoryRecord, ComponentScores)>,
        top_k: usize,
    ) -> RetrievalOutcome {
        let mut primary = Vec::new();
        let mut held_back = Vec::new();

        for (record, scores) in scored {
            if record.state == MemoryState::Superseded {
                continue;
            }
            let ranked = RankedMemory {
                score: self.blend(&scores),
                similarity: scores.similarity,
                retrievability: scores.retrievability,
                context_score: scores.context,
                record,
            };
            if ranked.record.state == MemoryState::Active
                && ranked.retrievability >= self.config.retrievability_floor
            {
                primary.push(ranked);
            } else {
                held_back.push(ranked);
            }
        }

        if !primary.is_empty() {
            sort_and_truncate(&mut primary, top_k);
            return RetrievalOutcome {
                results: primary,
                stale_fallback: false,
            };
        }
        if held_back.is_empty() {
            return RetrievalOutcome::default();
        }

        sort_and_truncate(&mut held_back, top_k);
        RetrievalOutcome {
            results: held_back,
            stale_fallback: true,
        }
    }

    /// Whether a surfaced result counts as an actual use of the memory
    pub fn counts_as_usage(&self, ranked: &RankedMemory) -> bool {
        ranked.score >= self.config.usage_threshold
    }
}

fn sort_and_truncate(results: &mut Vec<RankedMemory>, top_k: usize) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);
}
