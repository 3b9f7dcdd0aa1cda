//! Configuration for atlas-memory

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictConfig;
use crate::context::ContextWeights;
use crate::decay::DecayParams;
use crate::error::{Error, Result};
use crate::importance::ImportanceConfig;
use crate::ranker::RankerConfig;
use crate::service::SweepConfig;

/// Configuration for the memory engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Embedding model name (for reference, actual model set in embedding.rs)
    pub embedding_model: String,

    /// Embedding dimensions (384 for all-MiniLM-L6-v2)
    pub embedding_dimensions: usize,

    /// HTTP server port
    pub server_port: u16,

    /// Bounded retries when an optimistic-concurrency write loses the race
    pub max_write_retries: u32,

    /// Decay curve and review-update parameters
    pub decay: DecayParams,

    /// Context tag classes and their weights
    pub context: ContextWeights,

    /// Conflict gate thresholds
    pub conflict: ConflictConfig,

    /// Importance defaults and feedback steps
    pub importance: ImportanceConfig,

    /// Retrieval blend weights and floors
    pub ranker: RankerConfig,

    /// Maintenance sweep cadence and dormancy floor
    pub sweep: SweepConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("atlas-memory");

        Self {
            data_dir,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimensions: 384, // MiniLM-L6-v2 outputs 384-dim vectors
            server_port: 8420,
            max_write_retries: 4,
            decay: DecayParams::default(),
            context: ContextWeights::default(),
            conflict: ConflictConfig::default(),
            importance: ImportanceConfig::default(),
            ranker: RankerConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl Config {
    /// Create a config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Path to the SQLite database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("atlas.db")
    }

    /// Ensure the data directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be positive"));
        }
        if self.max_write_retries == 0 {
            return Err(Error::config("max_write_retries must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.conflict.high_similarity)
            || !(0.0..=1.0).contains(&self.conflict.gray_band_floor)
            || self.conflict.gray_band_floor >= self.conflict.high_similarity
        {
            return Err(Error::config(
                "conflict thresholds must satisfy 0 <= gray_band_floor < high_similarity <= 1",
            ));
        }
        if self.decay.stability_floor <= 0.0 {
            return Err(Error::config("stability_floor must be positive"));
        }
        if !(0.0..=1.0).contains(&self.ranker.retrievability_floor) {
            return Err(Error::config("retrievability_floor must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.sweep.dormancy_floor) {
            return Err(Error::config("dormancy_floor must be within [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server_port, 8420);
        assert_eq!(config.embedding_dimensions, 384);
        assert!(config.conflict.gray_band_floor < config.conflict.high_similarity);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::with_data_dir(dir.path());
        config.server_port = 9001;
        config.ranker.retrievability_floor = 0.5;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server_port, 9001);
        assert_eq!(loaded.ranker.retrievability_floor, 0.5);
        assert_eq!(loaded.data_dir, config.data_dir);
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"server_port": 9000, "conflict": {"high_similarity": 0.9}}"#,
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server_port, 9000);
        assert_eq!(loaded.conflict.high_similarity, 0.9);
        assert_eq!(loaded.conflict.gray_band_floor, 0.6);
        assert_eq!(loaded.embedding_dimensions, 384);
    }

    #[test]
    fn validate_rejects_inverted_conflict_thresholds() {
        let mut config = Config::default();
        config.conflict.gray_band_floor = 0.95;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn db_path_lives_under_data_dir() {
        let config = Config::with_data_dir("/tmp/atlas-test");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/atlas-test/atlas.db"));
    }
}
