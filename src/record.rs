//! Memory records and their lifecycle states

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lower bound for difficulty
pub const MIN_DIFFICULTY: f64 = 1.0;

/// Upper bound for difficulty
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Lifecycle state of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryState {
    /// Normal state - eligible for retrieval and decay updates
    Active,

    /// Retrievability fell below the usability floor; excluded from default
    /// retrieval until promoted or matched strongly enough to reactivate
    Dormant,

    /// Replaced by a newer record after a contradiction; retained as audit
    /// history, never retrieved through normal queries
    Superseded,
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryState::Active => write!(f, "active"),
            MemoryState::Dormant => write!(f, "dormant"),
            MemoryState::Superseded => write!(f, "superseded"),
        }
    }
}

impl std::str::FromStr for MemoryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(MemoryState::Active),
            "dormant" => Ok(MemoryState::Dormant),
            "superseded" => Ok(MemoryState::Superseded),
            other => Err(Error::storage(format!("Unknown memory state: {}", other))),
        }
    }
}

/// A persistent memory with spaced-repetition bookkeeping
///
/// Retrievability is deliberately absent: it is derived on demand from
/// (now, stability, last_reviewed_at) by the decay engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique record ID, immutable for the record's lifetime
    pub id: Uuid,

    /// The remembered content
    pub content: String,

    /// Embedding vector (owned copy, same dimensionality store-wide)
    pub embedding: Vec<f32>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the record was last reviewed (recall, lapse, or refinement)
    pub last_reviewed_at: DateTime<Utc>,

    /// Days for retrievability to decay to ~90% after a review; always
    /// above the configured floor
    pub stability: f64,

    /// Resistance to stabilization, bounded [1, 10]
    pub difficulty: f64,

    /// Importance score in [0, 1], mutated only through documented
    /// promote/demote/recall operations
    pub importance: f64,

    /// Lifecycle state
    pub state: MemoryState,

    /// Situational tags present at encoding time (`class:value` strings)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub context_tags: BTreeSet<String>,

    /// The record this one replaced, if it was created by a supersede
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,

    /// The record that replaced this one, set when state becomes Superseded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<Uuid>,

    /// How many reviews (successful or lapsed) this record has seen
    #[serde(default)]
    pub review_count: u32,

    /// Optimistic-concurrency counter, managed by the store
    #[serde(default)]
    pub version: i64,
}

impl MemoryRecord {
    /// Create a new Active record with neutral spaced-repetition defaults
    pub fn new(content: impl Into<String>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            embedding,
            created_at: now,
            last_reviewed_at: now,
            stability: 1.0,
            difficulty: 5.0,
            importance: 0.3,
            state: MemoryState::Active,
            context_tags: BTreeSet::new(),
            supersedes: None,
            superseded_by: None,
            review_count: 0,
            version: 0,
        }
    }

    /// Set the context tags
    pub fn with_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.context_tags = tags;
        self
    }

    /// Set the initial stability
    pub fn with_stability(mut self, stability: f64) -> Self {
        self.stability = stability;
        self
    }

    /// Set the initial difficulty
    pub fn with_difficulty(mut self, difficulty: f64) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Set the importance score
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    /// Link this record as the successor of an older one
    pub fn with_supersedes(mut self, prior: Uuid) -> Self {
        self.supersedes = Some(prior);
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == MemoryState::Active
    }

    pub fn is_dormant(&self) -> bool {
        self.state == MemoryState::Dormant
    }

    pub fn is_superseded(&self) -> bool {
        self.state == MemoryState::Superseded
    }

    /// Transition to Superseded, pointing forward at the replacement.
    /// Terminal: the record is immutable afterwards.
    pub fn mark_superseded_by(&mut self, successor: Uuid) {
        self.state = MemoryState::Superseded;
        self.superseded_by = Some(successor);
    }

    /// Transition Active -> Dormant (maintenance sweep)
    pub fn mark_dormant(&mut self) {
        self.state = MemoryState::Dormant;
    }

    /// Transition Dormant -> Active (explicit promote or strong-match recall)
    pub fn reactivate(&mut self) {
        if self.state == MemoryState::Dormant {
            self.state = MemoryState::Active;
        }
    }

    /// Check the stored-state invariants before a commit
    pub fn validate(&self, stability_floor: f64) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::invalid_input("Record content is empty"));
        }
        if !self.stability.is_finite() || self.stability < stability_floor {
            return Err(Error::invariant(format!(
                "Stability {} below floor {}",
                self.stability, stability_floor
            )));
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(Error::invariant(format!(
                "Difficulty {} outside [{}, {}]",
                self.difficulty, MIN_DIFFICULTY, MAX_DIFFICULTY
            )));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(Error::invariant(format!(
                "Importance {} outside [0, 1]",
                self.importance
            )));
        }
        if self.supersedes == Some(self.id) || self.superseded_by == Some(self.id) {
            return Err(Error::invariant("Record cannot supersede itself"));
        }
        Ok(())
    }
}

/// Normalize one raw tag: trim, lowercase; empty tags are dropped
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().to_lowercase();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

/// Normalize a collection of raw tags into a deduplicated set
pub fn normalize_tags<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|t| normalize_tag(t.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MemoryRecord {
        MemoryRecord::new("user prefers async code", vec![0.1, 0.2, 0.3])
            .with_tags(normalize_tags(["domain:coding", "task:review"]))
    }

    #[test]
    fn new_records_start_active_and_unreviewed() {
        let r = record();
        assert_eq!(r.state, MemoryState::Active);
        assert_eq!(r.review_count, 0);
        assert_eq!(r.version, 0);
        assert!(r.supersedes.is_none());
        assert!(r.superseded_by.is_none());
    }

    #[test]
    fn serde_round_trip_preserves_every_field() {
        let mut r = record();
        r.supersedes = Some(Uuid::new_v4());
        r.review_count = 7;
        r.version = 3;
        r.state = MemoryState::Dormant;

        let json = serde_json::to_string(&r).unwrap();
        let back: MemoryRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, r.id);
        assert_eq!(back.content, r.content);
        assert_eq!(back.embedding, r.embedding);
        assert_eq!(back.created_at, r.created_at);
        assert_eq!(back.last_reviewed_at, r.last_reviewed_at);
        assert_eq!(back.stability, r.stability);
        assert_eq!(back.difficulty, r.difficulty);
        assert_eq!(back.importance, r.importance);
        assert_eq!(back.state, r.state);
        assert_eq!(back.context_tags, r.context_tags);
        assert_eq!(back.supersedes, r.supersedes);
        assert_eq!(back.superseded_by, r.superseded_by);
        assert_eq!(back.review_count, r.review_count);
        assert_eq!(back.version, r.version);
    }

    #[test]
    fn state_display_and_parse_round_trip() {
        for state in [
            MemoryState::Active,
            MemoryState::Dormant,
            MemoryState::Superseded,
        ] {
            let parsed: MemoryState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("archived".parse::<MemoryState>().is_err());
    }

    #[test]
    fn supersede_transition_is_recorded() {
        let mut old = record();
        let successor = Uuid::new_v4();
        old.mark_superseded_by(successor);
        assert_eq!(old.state, MemoryState::Superseded);
        assert_eq!(old.superseded_by, Some(successor));
    }

    #[test]
    fn reactivate_only_applies_to_dormant() {
        let mut r = record();
        r.mark_dormant();
        r.reactivate();
        assert_eq!(r.state, MemoryState::Active);

        let mut gone = record();
        gone.mark_superseded_by(Uuid::new_v4());
        gone.reactivate();
        assert_eq!(gone.state, MemoryState::Superseded);
    }

    #[test]
    fn validate_rejects_out_of_bounds_fields() {
        let mut r = record();
        r.stability = 0.0;
        assert!(matches!(
            r.validate(0.01),
            Err(Error::InvariantViolation(_))
        ));

        let mut r = record();
        r.difficulty = 11.0;
        assert!(r.validate(0.01).is_err());

        let mut r = record();
        r.importance = 1.5;
        assert!(r.validate(0.01).is_err());

        let mut r = record();
        r.supersedes = Some(r.id);
        assert!(r.validate(0.01).is_err());

        assert!(record().validate(0.01).is_ok());
    }

    #[test]
    fn tags_normalize_and_deduplicate() {
        let tags = normalize_tags(["  Domain:Coding ", "domain:coding", "", "Time:Evening"]);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("domain:coding"));
        assert!(tags.contains("time:evening"));
    }
}
