//! Context-dependent retrieval scoring over situational tags

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Per-class weighting for context tags
///
/// Tags are `class:value` strings ("domain:coding", "time:evening"); a tag
/// without a class falls back to the default weight. Domain/task classes
/// carry more weight than incidental ones such as time-of-day, so sharing a
/// domain moves the score further than sharing a mood.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWeights {
    /// Weight per tag class
    pub class_weights: BTreeMap<String, f64>,

    /// Weight for tags with no recognized class
    pub default_weight: f64,

    /// Score for zero-overlap queries: above zero (valid recalls happen out
    /// of context) but below any same-context match
    pub out_of_context_floor: f64,
}

impl Default for ContextWeights {
    fn default() -> Self {
        let class_weights = BTreeMap::from([
            ("domain".to_string(), 1.0),
            ("task".to_string(), 0.9),
            ("project".to_string(), 0.8),
            ("tool".to_string(), 0.6),
            ("time".to_string(), 0.2),
            ("mood".to_string(), 0.2),
        ]);
        Self {
            class_weights,
            default_weight: 0.5,
            out_of_context_floor: 0.1,
        }
    }
}

/// Scores situational-tag overlap between a query and a record
#[derive(Debug, Clone, Default)]
pub struct ContextMatcher {
    weights: ContextWeights,
}

impl ContextMatcher {
    pub fn new(weights: ContextWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ContextWeights {
        &self.weights
    }

    /// Weighted-Jaccard overlap mapped onto [floor, 1]
    pub fn score(&self, record_tags: &BTreeSet<String>, query_tags: &BTreeSet<String>) -> f64 {
        let floor = self.weights.out_of_context_floor;
        if record_tags.is_empty() || query_tags.is_empty() {
            return floor;
        }

        let mut intersection = 0.0;
        let mut union = 0.0;
        for tag in record_tags.union(query_tags) {
            let w = self.tag_weight(tag);
            union += w;
            if record_tags.contains(tag) && query_tags.contains(tag) {
                intersection += w;
            }
        }
        if union <= 0.0 {
            return floor;
        }

        floor + (1.0 - floor) * (intersection / union)
    }

    fn tag_weight(&self, tag: &str) -> f64 {
        match tag.split_once(':') {
            Some((class, _)) => self
                .weights
                .class_weights
                .get(class)
                .copied()
                .unwrap_or(self.weights.default_weight),
            None => self.weights.default_weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::normalize_tags;

    fn matcher() -> ContextMatcher {
        ContextMatcher::default()
    }

    #[test]
    fn exact_context_match_scores_highest() {
        let m = matcher();
        let tags = normalize_tags(["domain:coding", "task:review"]);
        assert!((m.score(&tags, &tags) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_overlap_scores_above_zero_but_below_any_match() {
        let m = matcher();
        let record = normalize_tags(["domain:coding"]);
        let disjoint = normalize_tags(["domain:cooking"]);
        let overlapping = normalize_tags(["domain:coding", "time:evening"]);

        let none = m.score(&record, &disjoint);
        let some = m.score(&record, &overlapping);

        assert!(none > 0.0);
        assert_eq!(none, m.weights().out_of_context_floor);
        assert!(some > none);
    }

    #[test]
    fn empty_tag_sets_fall_back_to_the_floor() {
        let m = matcher();
        let tags = normalize_tags(["domain:coding"]);
        let empty = BTreeSet::new();
        assert_eq!(m.score(&tags, &empty), m.weights().out_of_context_floor);
        assert_eq!(m.score(&empty, &tags), m.weights().out_of_context_floor);
    }

    #[test]
    fn domain_overlap_outweighs_incidental_overlap() {
        let m = matcher();
        let record = normalize_tags(["domain:coding", "time:evening"]);
        let domain_query = normalize_tags(["domain:coding", "time:morning"]);
        let time_query = normalize_tags(["domain:cooking", "time:evening"]);

        assert!(m.score(&record, &domain_query) > m.score(&record, &time_query));
    }

    #[test]
    fn unclassed_tags_use_the_default_weight() {
        let m = matcher();
        let record = normalize_tags(["standup"]);
        let query = normalize_tags(["standup", "domain:work"]);
        let score = m.score(&record, &query);
        // intersection = 0.5 (default), union = 0.5 + 1.0
        let expected = 0.1 + 0.9 * (0.5 / 1.5);
        assert!((score - expected).abs() < 1e-9);
    }
}
