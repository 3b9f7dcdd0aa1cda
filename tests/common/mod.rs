//! Shared fixtures for the end-to-end scenario tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use atlas_memory::config::Config;
use atlas_memory::embedding::EmbeddingClient;
use atlas_memory::error::{Error, Result};
use atlas_memory::service::MemoryService;
use atlas_memory::storage::MemoryStore;

pub const DIMS: usize = 4;

/// Embedder backed by a fixed phrase-to-vector table
///
/// Unknown text errors the way an unreachable model would.
pub struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl StubEmbedder {
    pub fn new(entries: &[(&str, [f32; DIMS])]) -> Self {
        let vectors = entries
            .iter()
            .map(|(text, v)| (text.to_string(), v.to_vec()))
            .collect();
        Self { vectors }
    }
}

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| Error::dependency(format!("no stub vector for {:?}", text)))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Service over an in-memory store with the given canned vectors
pub fn service_with(entries: &[(&str, [f32; DIMS])]) -> MemoryService {
    let config = Config::with_data_dir("/unused");
    let store = Arc::new(MemoryStore::in_memory(DIMS).unwrap());
    MemoryService::new(&config, store, Arc::new(StubEmbedder::new(entries)))
}

/// Service over an on-disk store in `dir`, for restart tests
pub fn service_at(dir: &Path, entries: &[(&str, [f32; DIMS])]) -> MemoryService {
    let mut config = Config::with_data_dir(dir);
    config.embedding_dimensions = DIMS;
    config.ensure_dirs().unwrap();
    let store = Arc::new(MemoryStore::open(&config).unwrap());
    MemoryService::new(&config, store, Arc::new(StubEmbedder::new(entries)))
}
