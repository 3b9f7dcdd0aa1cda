//! MemoryService: the orchestration facade over the whole engine
//!
//! Every externally visible operation goes through here: ingest with
//! conflict resolution, ranked retrieval with reactivation, explicit
//! feedback, host-reported reviews, and the maintenance sweep. All record
//! mutations use bounded optimistic retries against the store's version
//! column.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::conflict::{
    refined_content, ConflictCandidate, ConflictJudgment, ConflictResolver, Resolution,
};
use crate::context::ContextMatcher;
use crate::decay::{DecayEngine, RecallSignal};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::importance::{FeedbackDirection, ImportancePromoter};
use crate::ranker::{ComponentScores, RetrievalOutcome, RetrievalRanker};
use crate::record::{normalize_tags, MemoryRecord, MemoryState};
use crate::storage::{MemoryStore, StoreStats};

/// Maintenance sweep policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Active records whose retrievability fell below this move to Dormant
    pub dormancy_floor: f64,

    /// Seconds between background sweep passes
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            dormancy_floor: 0.9,
            interval_secs: 3600,
        }
    }
}

/// What an ingest did, reported back to the caller
///
/// Partial success does not exist: either exactly one of these happened and
/// committed, or the operation errored with no state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum IngestDecision {
    /// A brand-new record was created
    Created { record: MemoryRecord },

    /// An existing record absorbed the content as a refinement
    Updated { record: MemoryRecord },

    /// A contradicted record was retired and replaced
    Superseded { record: MemoryRecord, replaced: Uuid },

    /// Similarity fell in the gray band; nothing was written and the caller
    /// must disambiguate
    Ambiguous { candidates: Vec<ConflictCandidate> },
}

/// Outcome counts from one maintenance sweep pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub demoted: usize,
    pub shielded: usize,
    pub skipped: usize,
}

/// The memory engine facade
pub struct MemoryService {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingClient>,
    decay: DecayEngine,
    matcher: ContextMatcher,
    resolver: ConflictResolver,
    promoter: ImportancePromoter,
    ranker: RetrievalRanker,
    sweep: SweepConfig,
    max_write_retries: u32,
}

impl MemoryService {
    /// Build the service from configuration, a store, and an embedder
    pub fn new(
        config: &Config,
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            store,
            embedder,
            decay: DecayEngine::new(config.decay.clone()),
            matcher: ContextMatcher::new(config.context.clone()),
            resolver: ConflictResolver::new(config.conflict.clone()),
            promoter: ImportancePromoter::new(config.importance.clone()),
            ranker: RetrievalRanker::new(config.ranker.clone()),
            sweep: config.sweep.clone(),
            max_write_retries: config.max_write_retries,
        }
    }

    /// Install an external judge for high-similarity conflict pairs
    pub fn with_judgment(mut self, judgment: Arc<dyn ConflictJudgment>) -> Self {
        self.resolver = self.resolver.with_judgment(judgment);
        self
    }

    /// The underlying store
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// The sweep policy this service runs with
    pub fn sweep_config(&self) -> &SweepConfig {
        &self.sweep
    }

    /// Ingest one piece of content: embed it, resolve conflicts against
    /// similar live records, and commit exactly one decision
    pub async fn ingest<I, S>(
        &self,
        content: &str,
        tags: I,
        high_leverage: bool,
    ) -> Result<IngestDecision>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::invalid_input("Memory content is empty"));
        }
        let tags = normalize_tags(tags);
        let embedding = self.embedder.embed(content).await?;

        let candidates = self.store.similarity_candidates(
            &embedding,
            self.resolver.config().gray_band_floor as f32,
            self.ranker.config().max_candidates,
            &[MemoryState::Active, MemoryState::Dormant],
        )?;
        let scored: Vec<(MemoryRecord, f64)> = candidates
            .into_iter()
            .map(|(record, score)| (record, f64::from(score)))
            .collect();

        match self.resolver.resolve(content, &tags, &scored).await? {
            Resolution::Create => {
                let p = self.decay.params();
                let record = MemoryRecord::new(content, embedding)
                    .with_tags(tags)
                    .with_stability(p.stability_seed)
                    .with_difficulty(p.difficulty_target)
                    .with_importance(self.promoter.initial_importance(high_leverage));
                record.validate(p.stability_floor)?;
                self.store.insert(&record)?;
                debug!(id = %record.id, "created memory");
                Ok(IngestDecision::Created { record })
            }
            Resolution::Update { target } => {
                let record =
                    self.absorb_refinement(target, content, &embedding, &tags, high_leverage)?;
                debug!(id = %record.id, "refined memory");
                Ok(IngestDecision::Updated { record })
            }
            Resolution::Supersede { target } => {
                let (record, replaced) =
                    self.replace_contradicted(target, content, &embedding, &tags, high_leverage)?;
                info!(old = %replaced, new = %record.id, "superseded contradicted memory");
                Ok(IngestDecision::Superseded { record, replaced })
            }
            Resolution::Ambiguous { candidates } => {
                debug!(count = candidates.len(), "ambiguous ingest, nothing written");
                Ok(IngestDecision::Ambiguous { candidates })
            }
        }
    }

    /// Retrieve ranked memories for a query
    ///
    /// Dormant candidates matched at or above the reactivation similarity
    /// come back to Active first. Surfaced results scoring at or above the
    /// usage threshold count as recalls and update decay state; stale
    /// fallback results never do.
    pub async fn retrieve<I, S>(
        &self,
        query: &str,
        tags: I,
        top_k: usize,
        high_leverage: bool,
    ) -> Result<RetrievalOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_input("Query is empty"));
        }
        let query_tags = normalize_tags(tags);
        let embedding = self.embedder.embed(query).await?;

        let rc = self.ranker.config();
        let candidates = self.store.similarity_candidates(
            &embedding,
            rc.candidate_floor as f32,
            rc.max_candidates,
            &[MemoryState::Active, MemoryState::Dormant],
        )?;

        let now = Utc::now();
        let mut refreshed: HashSet<Uuid> = HashSet::new();
        let mut scored = Vec::with_capacity(candidates.len());
        for (mut record, similarity) in candidates {
            let similarity = f64::from(similarity);
            if record.is_dormant() && similarity >= rc.reactivation_similarity {
                match self.register_usage(record.id, high_leverage) {
                    Ok(fresh) => {
                        debug!(id = %fresh.id, "reactivated dormant memory on strong match");
                        record = fresh;
                        refreshed.insert(record.id);
                    }
                    // A racing writer got there first; rank the snapshot we
                    // have rather than failing the whole query
                    Err(e) if e.is_transient() => {
                        warn!(id = %record.id, error = %e, "reactivation lost its write race")
                    }
                    Err(Error::InvalidInput(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            let scores = ComponentScores {
                similarity,
                retrievability: self.decay.retrievability(&record, now),
                context: self.matcher.score(&record.context_tags, &query_tags),
                importance: record.importance,
            };
            scored.push((record, scores));
        }

        let mut outcome = self.ranker.rank(scored, top_k);
        if outcome.stale_fallback {
            debug!(
                results = outcome.results.len(),
                "no candidate cleared the retrievability floor, returning stale fallback"
            );
            return Ok(outcome);
        }

        for ranked in &mut outcome.results {
            if !self.ranker.counts_as_usage(ranked) || refreshed.contains(&ranked.record.id) {
                continue;
            }
            match self.register_usage(ranked.record.id, high_leverage) {
                Ok(fresh) => ranked.record = fresh,
                Err(e) if e.is_transient() => {
                    warn!(id = %ranked.record.id, error = %e, "usage update lost its write race")
                }
                Err(Error::InvalidInput(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Fetch one record
    pub fn get(&self, id: Uuid) -> Result<MemoryRecord> {
        self.store.get_required(id)
    }

    /// The supersede chain for a record, newest first
    pub fn history(&self, id: Uuid) -> Result<Vec<MemoryRecord>> {
        self.store.history(id)
    }

    /// Newest-first listing, optionally filtered to one state
    pub fn list(&self, state: Option<MemoryState>, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.store.list(state, limit)
    }

    /// Store-wide counts and averages
    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// Retrievability of a record as of now
    pub fn current_retrievability(&self, record: &MemoryRecord) -> f64 {
        self.decay.retrievability(record, Utc::now())
    }

    /// Raise importance by the configured step; reactivates a Dormant record
    pub fn promote(&self, id: Uuid) -> Result<MemoryRecord> {
        let record = self.with_cas_retries(id, |record| {
            require_mutable(record)?;
            self.promoter.apply_feedback(record, FeedbackDirection::Promote);
            record.reactivate();
            Ok(())
        })?;
        info!(id = %record.id, importance = record.importance, "promoted memory");
        Ok(record)
    }

    /// Lower importance by the configured step
    pub fn demote(&self, id: Uuid) -> Result<MemoryRecord> {
        let record = self.with_cas_retries(id, |record| {
            require_mutable(record)?;
            self.promoter.apply_feedback(record, FeedbackDirection::Demote);
            Ok(())
        })?;
        info!(id = %record.id, importance = record.importance, "demoted memory");
        Ok(record)
    }

    /// Apply a host-reported review outcome to a record
    ///
    /// Success signals also reactivate a Dormant record: the host just
    /// proved the memory is in use.
    pub fn record_review(&self, id: Uuid, signal: RecallSignal) -> Result<MemoryRecord> {
        self.with_cas_retries(id, |record| {
            require_mutable(record)?;
            self.decay.apply_recall(record, Utc::now(), signal);
            if signal != RecallSignal::Failed {
                record.reactivate();
            }
            Ok(())
        })
    }

    /// One sweep pass: move Active records below the dormancy floor to
    /// Dormant, reverting their difficulty toward the target on the way
    ///
    /// Idempotent: state depends only on (now, stability, last_reviewed_at),
    /// and already-Dormant records are not scanned, so an immediate second
    /// pass changes nothing.
    pub fn run_maintenance_sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();
        let actives = self.store.records_in_states(&[MemoryState::Active])?;
        report.scanned = actives.len();

        for mut record in actives {
            if self.decay.retrievability(&record, now) >= self.sweep.dormancy_floor {
                continue;
            }
            if self.promoter.shields_from_dormancy(&record) {
                report.shielded += 1;
                continue;
            }
            record.mark_dormant();
            record.difficulty = self.decay.revert_difficulty(record.difficulty);
            if self.store.update(&mut record)? {
                report.demoted += 1;
            } else {
                // A concurrent reviewer touched it since our snapshot; its
                // decay state is fresher than ours, leave it for next pass
                report.skipped += 1;
                debug!(id = %record.id, "sweep skipped a concurrently updated record");
            }
        }

        info!(
            scanned = report.scanned,
            demoted = report.demoted,
            shielded = report.shielded,
            skipped = report.skipped,
            "maintenance sweep complete"
        );
        Ok(report)
    }

    /// Shared recall side effect: reactivate if Dormant, apply a Good
    /// recall, and let the promoter consider an importance bump
    fn register_usage(&self, id: Uuid, high_leverage: bool) -> Result<MemoryRecord> {
        self.with_cas_retries(id, |record| {
            require_mutable(record)?;
            // Boost before reactivating so the promoter still sees Dormant
            self.promoter.on_recall(record, high_leverage);
            record.reactivate();
            self.decay.apply_recall(record, Utc::now(), RecallSignal::Good);
            Ok(())
        })
    }

    /// CAS loop for a refinement: merge content and tags into the target
    /// and count the refinement as a successful review
    fn absorb_refinement(
        &self,
        target: Uuid,
        content: &str,
        embedding: &[f32],
        tags: &std::collections::BTreeSet<String>,
        high_leverage: bool,
    ) -> Result<MemoryRecord> {
        let mut id = target;
        for attempt in 0..self.max_write_retries {
            let mut record = self.store.get_required(id)?;
            if let Some(successor) = record.superseded_by {
                // The target was replaced mid-flight; the refinement belongs
                // to whatever carries the fact now
                debug!(old = %id, new = %successor, "refinement target was superseded, following");
                id = successor;
                continue;
            }

            let merged = refined_content(&record.content, content).to_string();
            if merged != record.content {
                record.content = merged;
                record.embedding = embedding.to_vec();
            }
            record.context_tags.extend(tags.iter().cloned());
            self.promoter.on_recall(&mut record, high_leverage);
            record.reactivate();
            self.decay.apply_recall(&mut record, Utc::now(), RecallSignal::Good);
            record.validate(self.decay.params().stability_floor)?;

            if self.store.update(&mut record)? {
                return Ok(record);
            }
            debug!(%id, attempt, "refinement lost a write race, retrying");
        }
        Err(Error::stale_write(id, self.max_write_retries))
    }

    /// CAS loop for a contradiction: lapse the old record, build its
    /// successor with carried stability and importance, and commit both in
    /// one transaction
    fn replace_contradicted(
        &self,
        target: Uuid,
        content: &str,
        embedding: &[f32],
        tags: &std::collections::BTreeSet<String>,
        high_leverage: bool,
    ) -> Result<(MemoryRecord, Uuid)> {
        let p = self.decay.params();
        let mut id = target;
        for attempt in 0..self.max_write_retries {
            let mut old = self.store.get_required(id)?;
            if let Some(successor) = old.superseded_by {
                debug!(old = %id, new = %successor, "contradiction target was superseded, following");
                id = successor;
                continue;
            }

            // The contradiction is a failed review of the old record
            self.decay.apply_lapse(&mut old, Utc::now());

            let successor_tags = if tags.is_empty() {
                old.context_tags.clone()
            } else {
                tags.clone()
            };
            let successor = MemoryRecord::new(content, embedding.to_vec())
                .with_tags(successor_tags)
                .with_stability(self.resolver.carried_stability(old.stability, p.stability_seed))
                .with_difficulty(p.difficulty_target)
                .with_importance(
                    old.importance
                        .max(self.promoter.initial_importance(high_leverage)),
                )
                .with_supersedes(old.id);
            old.mark_superseded_by(successor.id);

            successor.validate(p.stability_floor)?;
            old.validate(p.stability_floor)?;

            if self.store.supersede(&mut old, &successor)? {
                return Ok((successor, old.id));
            }
            debug!(%id, attempt, "supersede lost a write race, retrying");
        }
        Err(Error::stale_write(id, self.max_write_retries))
    }

    /// Load-mutate-commit with bounded optimistic retries
    fn with_cas_retries<F>(&self, id: Uuid, mut mutate: F) -> Result<MemoryRecord>
    where
        F: FnMut(&mut MemoryRecord) -> Result<()>,
    {
        for attempt in 0..self.max_write_retries {
            let mut record = self.store.get_required(id)?;
            mutate(&mut record)?;
            record.validate(self.decay.params().stability_floor)?;
            if self.store.update(&mut record)? {
                return Ok(record);
            }
            debug!(%id, attempt, "optimistic write lost the race, retrying");
        }
        warn!(%id, attempts = self.max_write_retries, "write retries exhausted");
        Err(Error::stale_write(id, self.max_write_retries))
    }
}

fn require_mutable(record: &MemoryRecord) -> Result<()> {
    if record.is_superseded() {
        return Err(Error::invalid_input(format!(
            "Memory {} is superseded and immutable",
            record.id
        )));
    }
    Ok(())
}
