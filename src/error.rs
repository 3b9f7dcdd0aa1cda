//! Error types for atlas-memory

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for atlas-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in atlas-memory
///
/// An ambiguous conflict is deliberately not represented here: it is a
/// first-class ingest outcome the caller must disambiguate, not a failure.
#[derive(Error, Debug)]
pub enum Error {
    /// An external collaborator (embedding or conflict judgment) failed or
    /// timed out. The operation aborted with no state change; retrying is
    /// the caller's decision.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A record mutation would break a stored-state invariant. The operation
    /// is rejected before commit and never retried.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// An optimistic-concurrency check failed repeatedly; transient, the
    /// caller may retry the whole operation.
    #[error("Stale write on {id} after {attempts} attempts")]
    StaleWrite { id: Uuid, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn stale_write(id: Uuid, attempts: u32) -> Self {
        Self::StaleWrite { id, attempts }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the failure is transient and the whole operation can be
    /// retried safely by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DependencyUnavailable(_) | Error::StaleWrite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_flagged() {
        assert!(Error::dependency("embedder offline").is_transient());
        assert!(Error::stale_write(Uuid::new_v4(), 4).is_transient());
        assert!(!Error::invariant("stability at floor").is_transient());
        assert!(!Error::not_found("nope").is_transient());
    }

    #[test]
    fn stale_write_reports_id_and_attempts() {
        let id = Uuid::new_v4();
        let msg = Error::stale_write(id, 3).to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains('3'));
    }
}
