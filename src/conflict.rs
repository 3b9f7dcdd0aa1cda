//! Conflict resolution for incoming memories

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::record::MemoryRecord;

/// Words ignored when comparing content token sets. Negations are kept on
/// purpose: "does not like" must not collapse into "likes".
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "to", "of", "in", "on", "at",
    "for", "with", "and", "or", "it", "this", "that", "their", "his", "her", "my", "your", "our",
];

/// Verdict on how incoming content relates to an existing memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgmentKind {
    /// Incoming restates or extends the existing memory
    Refinement,
    /// Incoming shares the subject but asserts a different value
    Contradiction,
    /// Similarity was coincidental; the contents are about different things
    Unrelated,
}

/// Pluggable semantic judge for high-similarity pairs
///
/// The default deterministic heuristic, a local classifier, or a remote LLM
/// call can all satisfy this contract; the resolver's control flow does not
/// change. Failures surface as `DependencyUnavailable` and abort the ingest
/// with no write.
#[async_trait]
pub trait ConflictJudgment: Send + Sync {
    async fn judge(&self, existing: &str, incoming: &str) -> Result<JudgmentKind>;
}

/// Thresholds and carry-over for conflict resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Cosine similarity at or above which a candidate is a conflict match
    pub high_similarity: f64,

    /// Lower bound of the ambiguous gray band
    pub gray_band_floor: f64,

    /// Fraction of a superseded record's post-lapse stability carried
    /// forward to its replacement
    pub stability_carry: f64,

    /// Most candidates reported back on an ambiguous outcome
    pub max_ambiguous_candidates: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            high_similarity: 0.85,
            gray_band_floor: 0.6,
            stability_carry: 0.5,
            max_ambiguous_candidates: 5,
        }
    }
}

/// A similar existing record reported on an ambiguous ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCandidate {
    pub id: Uuid,
    pub similarity: f64,
    pub content: String,
}

/// Outcome of conflict resolution; exactly one of these precedes any write
#[derive(Debug, Clone)]
pub enum Resolution {
    /// No sufficiently similar live record exists
    Create,

    /// The target record absorbs the incoming content as a refinement
    Update { target: Uuid },

    /// The target record is contradicted and must be replaced
    Supersede { target: Uuid },

    /// Similarity falls in the gray band (or a strong match lacks any shared
    /// context); the caller must disambiguate - nothing is written
    Ambiguous { candidates: Vec<ConflictCandidate> },
}

/// Decides CREATE / UPDATE / SUPERSEDE / AMBIGUOUS for incoming content
pub struct ConflictResolver {
    config: ConflictConfig,
    judgment: Option<Arc<dyn ConflictJudgment>>,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig) -> Self {
        Self {
            config,
            judgment: None,
        }
    }

    /// Install an external judge for high-similarity pairs
    pub fn with_judgment(mut self, judgment: Arc<dyn ConflictJudgment>) -> Self {
        self.judgment = Some(judgment);
        self
    }

    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Resolve incoming content against scored live candidates.
    ///
    /// A strong match needs similarity >= the high threshold and shared
    /// context; a tagless side counts as sharing vacuously, so untagged
    /// callers still get conflict resolution. High-similarity matches with
    /// genuinely disjoint tags are reported as ambiguous rather than
    /// silently resolved.
    pub async fn resolve(
        &self,
        incoming: &str,
        incoming_tags: &BTreeSet<String>,
        candidates: &[(MemoryRecord, f64)],
    ) -> Result<Resolution> {
        let strong = candidates
            .iter()
            .filter(|(record, similarity)| {
                *similarity >= self.config.high_similarity
                    && tags_overlap(&record.context_tags, incoming_tags)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((record, _)) = strong {
            let kind = match &self.judgment {
                Some(judge) => judge.judge(&record.content, incoming).await?,
                None => heuristic_judgment(&record.content, incoming),
            };
            return Ok(match kind {
                JudgmentKind::Refinement => Resolution::Update { target: record.id },
                JudgmentKind::Contradiction => Resolution::Supersede { target: record.id },
                JudgmentKind::Unrelated => Resolution::Create,
            });
        }

        let mut gray: Vec<&(MemoryRecord, f64)> = candidates
            .iter()
            .filter(|(_, similarity)| *similarity >= self.config.gray_band_floor)
            .collect();
        if gray.is_empty() {
            return Ok(Resolution::Create);
        }

        gray.sort_by(|a, b| b.1.total_cmp(&a.1));
        let candidates = gray
            .into_iter()
            .take(self.config.max_ambiguous_candidates)
            .map(|(record, similarity)| ConflictCandidate {
                id: record.id,
                similarity: *similarity,
                content: record.content.clone(),
            })
            .collect();
        Ok(Resolution::Ambiguous { candidates })
    }

    /// Stability for a replacement record: a fraction of what survived the
    /// old record's lapse, but never below the fresh seed
    pub fn carried_stability(&self, post_lapse_stability: f64, seed: f64) -> f64 {
        (self.config.stability_carry * post_lapse_stability).max(seed)
    }
}

/// Content kept after an UPDATE: the refinement wins unless the existing
/// text already subsumes the incoming restatement
pub fn refined_content<'a>(existing: &'a str, incoming: &'a str) -> &'a str {
    let existing_tokens = content_tokens(existing);
    let incoming_tokens = content_tokens(incoming);
    if existing_tokens.is_superset(&incoming_tokens) && existing_tokens != incoming_tokens {
        existing
    } else {
        incoming
    }
}

/// Deterministic fallback judge: a token-superset is a refinement, anything
/// else sharing this much similarity is a contradiction
fn heuristic_judgment(existing: &str, incoming: &str) -> JudgmentKind {
    let existing_tokens = content_tokens(existing);
    let incoming_tokens = content_tokens(incoming);
    if incoming_tokens.is_superset(&existing_tokens) || existing_tokens.is_superset(&incoming_tokens)
    {
        JudgmentKind::Refinement
    } else {
        JudgmentKind::Contradiction
    }
}

fn tags_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.intersection(b).next().is_some()
}

fn content_tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::normalize_tags;

    fn record(content: &str, tags: &[&str]) -> MemoryRecord {
        MemoryRecord::new(content, vec![0.0; 4]).with_tags(normalize_tags(tags.iter().copied()))
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(ConflictConfig::default())
    }

    struct FixedJudge(JudgmentKind);

    #[async_trait]
    impl ConflictJudgment for FixedJudge {
        async fn judge(&self, _existing: &str, _incoming: &str) -> Result<JudgmentKind> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn no_candidates_creates() {
        let r = resolver();
        let tags = normalize_tags(["domain:coding"]);
        let resolution = r.resolve("user prefers async code", &tags, &[]).await.unwrap();
        assert!(matches!(resolution, Resolution::Create));
    }

    #[tokio::test]
    async fn low_similarity_creates() {
        let r = resolver();
        let existing = record("loves hiking", &["domain:leisure"]);
        let tags = normalize_tags(["domain:finance"]);
        let resolution = r
            .resolve("pays rent on the 1st", &tags, &[(existing, 0.12)])
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Create));
    }

    #[tokio::test]
    async fn contradicting_value_supersedes() {
        let r = resolver();
        let existing = record("user prefers async code", &["domain:coding"]);
        let id = existing.id;
        let tags = normalize_tags(["domain:coding"]);
        let resolution = r
            .resolve(
                "user prefers blocking code for this project",
                &tags,
                &[(existing, 0.93)],
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Supersede { target } if target == id));
    }

    #[tokio::test]
    async fn refining_superset_updates() {
        let r = resolver();
        let existing = record("user prefers async code", &["domain:coding"]);
        let id = existing.id;
        let tags = normalize_tags(["domain:coding"]);
        let resolution = r
            .resolve(
                "user strongly prefers async code in rust services",
                &tags,
                &[(existing, 0.9)],
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Update { target } if target == id));
    }

    #[tokio::test]
    async fn gray_band_is_ambiguous_and_writes_nothing() {
        let r = resolver();
        let close = record("user prefers async code", &["domain:coding"]);
        let closer = record("user likes async programming", &["domain:coding"]);
        let closer_id = closer.id;
        let tags = normalize_tags(["domain:coding"]);
        let resolution = r
            .resolve(
                "user enjoys asynchronous style",
                &tags,
                &[(close, 0.65), (closer, 0.79)],
            )
            .await
            .unwrap();

        match resolution {
            Resolution::Ambiguous { candidates } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].id, closer_id, "sorted by similarity");
                assert!(candidates[0].similarity > candidates[1].similarity);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn strong_match_with_disjoint_tags_is_ambiguous() {
        let r = resolver();
        let existing = record("user prefers async code", &["domain:coding"]);
        let tags = normalize_tags(["domain:cooking"]);
        let resolution = r
            .resolve("user prefers blocking code", &tags, &[(existing, 0.9)])
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Ambiguous { .. }));
    }

    #[tokio::test]
    async fn untagged_ingest_still_resolves_conflicts() {
        let r = resolver();
        let existing = record("user prefers async code", &["domain:coding"]);
        let resolution = r
            .resolve(
                "user prefers blocking code for this project",
                &BTreeSet::new(),
                &[(existing, 0.9)],
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Supersede { .. }));
    }

    #[tokio::test]
    async fn external_judgment_overrides_the_heuristic() {
        let existing = record("user prefers async code", &["domain:coding"]);
        let tags = normalize_tags(["domain:coding"]);

        let r = resolver().with_judgment(Arc::new(FixedJudge(JudgmentKind::Unrelated)));
        let resolution = r
            .resolve(
                "user prefers blocking code for this project",
                &tags,
                &[(existing.clone(), 0.9)],
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Create));

        let r = resolver().with_judgment(Arc::new(FixedJudge(JudgmentKind::Contradiction)));
        let resolution = r
            .resolve(
                "user strongly prefers async code in rust services",
                &tags,
                &[(existing, 0.9)],
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Supersede { .. }));
    }

    #[test]
    fn negations_are_not_stopwords() {
        let resolution = heuristic_judgment("user likes spicy food", "user does not like spicy food");
        assert_eq!(resolution, JudgmentKind::Contradiction);
    }

    #[test]
    fn refined_content_keeps_the_richer_text() {
        assert_eq!(
            refined_content("user prefers async code", "user prefers async code in rust"),
            "user prefers async code in rust"
        );
        assert_eq!(
            refined_content("user prefers async code in rust", "user prefers async code"),
            "user prefers async code in rust"
        );
        assert_eq!(
            refined_content("user prefers async code", "user prefers async code"),
            "user prefers async code"
        );
    }

    #[test]
    fn carried_stability_never_cold_starts_below_seed() {
        let r = resolver();
        assert_eq!(r.carried_stability(20.0, 1.0), 10.0);
        assert_eq!(r.carried_stability(0.4, 1.0), 1.0);
    }
}
