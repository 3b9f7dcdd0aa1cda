//! Storage for atlas-memory: SQLite rows plus an in-memory vector index

mod sqlite;
pub mod vector;

pub use sqlite::SqliteStorage;
pub use vector::{SimilarityHit, VectorIndex};

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::{MemoryRecord, MemoryState};

/// Counts and averages over the whole store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub active: u64,
    pub dormant: u64,
    pub superseded: u64,
    pub avg_active_stability: f64,
    pub avg_active_importance: f64,
}

/// Persistent memory store
///
/// SQLite is the source of truth; the vector index mirrors the embeddings
/// of non-superseded records and is rebuilt from the rows at open. Index
/// updates happen only after the corresponding row change commits.
pub struct MemoryStore {
    sqlite: SqliteStorage,
    index: RwLock<VectorIndex>,
}

impl MemoryStore {
    /// Open the store at the configured path and rebuild the vector index
    pub fn open(config: &Config) -> Result<Self> {
        let sqlite = SqliteStorage::open(&config.db_path())?;
        Self::with_sqlite(sqlite, config.embedding_dimensions)
    }

    /// Fully in-memory store for tests and ephemeral runs
    pub fn in_memory(dimensions: usize) -> Result<Self> {
        Self::with_sqlite(SqliteStorage::in_memory()?, dimensions)
    }

    fn with_sqlite(sqlite: SqliteStorage, dimensions: usize) -> Result<Self> {
        let mut index = VectorIndex::new(dimensions);
        for (id, embedding) in sqlite.live_embeddings()? {
            index.upsert(id, embedding)?;
        }
        Ok(Self {
            sqlite,
            index: RwLock::new(index),
        })
    }

    /// Insert a new record
    pub fn insert(&self, record: &MemoryRecord) -> Result<()> {
        self.sqlite.insert(record)?;
        self.index_write()?
            .upsert(record.id, record.embedding.clone())?;
        Ok(())
    }

    /// Load one record
    pub fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.sqlite.get(id)
    }

    /// Load one record, erroring when absent
    pub fn get_required(&self, id: Uuid) -> Result<MemoryRecord> {
        self.get(id)?
            .ok_or_else(|| Error::not_found(format!("No memory with id {}", id)))
    }

    /// CAS update of an existing record; `false` means the version was stale
    pub fn update(&self, record: &mut MemoryRecord) -> Result<bool> {
        if !self.sqlite.update(record)? {
            return Ok(false);
        }
        let mut index = self.index_write()?;
        if record.state == MemoryState::Superseded {
            index.remove(record.id);
        } else {
            index.upsert(record.id, record.embedding.clone())?;
        }
        Ok(true)
    }

    /// Atomic supersede: insert the successor and retire the old record in
    /// one transaction; `false` means the old record's version was stale
    pub fn supersede(&self, old: &mut MemoryRecord, successor: &MemoryRecord) -> Result<bool> {
        if !self.sqlite.supersede(old, successor)? {
            return Ok(false);
        }
        let mut index = self.index_write()?;
        index.remove(old.id);
        index.upsert(successor.id, successor.embedding.clone())?;
        Ok(true)
    }

    /// All records in the given states, tags included
    pub fn records_in_states(&self, states: &[MemoryState]) -> Result<Vec<MemoryRecord>> {
        self.sqlite.records_in_states(states)
    }

    /// Similarity candidates against the query embedding, restricted to the
    /// given states, best first
    pub fn similarity_candidates(
        &self,
        query: &[f32],
        min_score: f32,
        limit: usize,
        states: &[MemoryState],
    ) -> Result<Vec<(MemoryRecord, f32)>> {
        let hits = self.index_read()?.search(query, min_score, limit);
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let scores: HashMap<Uuid, f32> = hits.iter().map(|h| (h.id, h.score)).collect();

        let mut out: Vec<(MemoryRecord, f32)> = self
            .sqlite
            .get_many(&ids)?
            .into_iter()
            .filter(|r| states.contains(&r.state))
            .map(|r| {
                let score = scores[&r.id];
                (r, score)
            })
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(out)
    }

    /// Walk the supersede chain backwards from a record
    ///
    /// Returns the record itself first, then each predecessor in turn. A
    /// repeated ID means a corrupted link graph and surfaces as an
    /// invariant violation.
    pub fn history(&self, id: Uuid) -> Result<Vec<MemoryRecord>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(Error::invariant(format!(
                    "Supersede chain cycle at {}",
                    current
                )));
            }
            let record = self.get_required(current)?;
            cursor = record.supersedes;
            chain.push(record);
        }
        Ok(chain)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.sqlite.stats()
    }

    pub fn list(&self, state: Option<MemoryState>, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.sqlite.list(state, limit)
    }

    fn index_read(&self) -> Result<std::sync::RwLockReadGuard<'_, VectorIndex>> {
        self.index.read().map_err(|e| Error::storage(e.to_string()))
    }

    fn index_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, VectorIndex>> {
        self.index.write().map_err(|e| Error::storage(e.to_string()))
    }
}
