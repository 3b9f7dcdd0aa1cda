//! # Atlas Memory
//!
//! A cognitive memory engine for AI agents, modeled on human remembering:
//! memories strengthen with use, fade without it, and are replaced rather
//! than edited when the facts change.
//!
//! ## Architecture
//!
//! The engine is built from small, separately testable pieces:
//! - **Records** - content plus spaced-repetition state (stability,
//!   difficulty, importance) and a lifecycle (Active / Dormant / Superseded)
//! - **Decay** - an FSRS-lineage forgetting curve; retrievability is always
//!   derived, never stored
//! - **Conflict resolution** - incoming content either creates, refines,
//!   supersedes, or is reported back as ambiguous
//! - **Retrieval** - blended ranking over similarity, retrievability,
//!   context overlap, and importance; surfaced results count as recalls
//! - **Storage** - SQLite rows with optimistic versioning plus an in-memory
//!   vector index
//!
//! ## Usage
//!
//! ```rust,ignore
//! use atlas_memory::{Config, MemoryService, MemoryStore};
//!
//! let config = Config::default();
//! let store = Arc::new(MemoryStore::open(&config)?);
//! let embedder = Arc::new(LocalEmbedder::new(&config)?);
//! let service = MemoryService::new(&config, store, embedder);
//!
//! // Ingest new content; the engine decides create/update/supersede
//! let decision = service.ingest("user prefers async code", tags, false).await?;
//!
//! // Retrieve ranked memories for a query
//! let outcome = service.retrieve("how does the user like code written?", tags, 5, false).await?;
//! ```

pub mod config;
pub mod conflict;
pub mod context;
pub mod decay;
pub mod embedding;
pub mod error;
pub mod importance;
pub mod ranker;
pub mod record;
pub mod service;
pub mod storage;

pub use config::Config;
pub use decay::RecallSignal;
pub use error::{Error, Result};
pub use ranker::{RankedMemory, RetrievalOutcome};
pub use record::{MemoryRecord, MemoryState};
pub use service::{IngestDecision, MemoryService, SweepReport};
pub use storage::MemoryStore;
