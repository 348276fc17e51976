//! Error taxonomy shared by the walker, the orchestrator and the queue.
//!
//! Per-language failures never escape `Orchestrator::translate`; they are
//! returned inside the outcome map. Only caller mistakes (`InvalidInput`) and
//! failures to load the source post are raised as `Err`.

use thiserror::Error;

/// Failure of a collaborator (post, link, field or queue storage).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness rule was violated, e.g. a second translation for the
    /// same (group, language) pair.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data cannot be mapped onto the field tree.
    #[error("malformed stored data: {0}")]
    Malformed(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                entity: "row",
                id: "?".to_string(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Why a translation could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// Empty or malformed caller arguments; raised before any side effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The external translate capability reported an error. Retryable.
    #[error("translation capability failed: {0}")]
    CapabilityFailure(String),

    /// The external call exceeded its time bound. Retryable.
    #[error("translation capability timed out after {0}s")]
    Timeout(u64),

    /// A post, link or field write failed. Not retried automatically.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// The field tree violates extraction invariants.
    #[error("malformed field tree: {0}")]
    MalformedTree(String),
}

impl TranslateError {
    /// Whether a queue retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslateError::CapabilityFailure(_) | TranslateError::Timeout(_)
        )
    }
}

impl From<StoreError> for TranslateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Malformed(msg) => TranslateError::MalformedTree(msg),
            other => TranslateError::PersistenceFailure(other.to_string()),
        }
    }
}
