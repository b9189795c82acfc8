//! Error types for the entity store boundary.

use rudder_types::EntityKind;
use thiserror::Error;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-name violation within organization + kind.
    #[error("{kind} {name:?} already exists in organization {organization}")]
    AlreadyExists {
        kind: EntityKind,
        name: String,
        organization: String,
    },

    /// The addressed entity does not exist.
    #[error("{kind} {name:?} not found in organization {organization}")]
    NotFound {
        kind: EntityKind,
        name: String,
        organization: String,
    },

    /// Optimistic-concurrency check failed: a concurrent writer advanced the
    /// revision first. Recoverable; the next resync pass retries.
    #[error("stale revision for {name:?}: supplied {supplied}, stored {stored}")]
    RevisionConflict {
        name: String,
        supplied: u64,
        stored: u64,
    },

    #[error("{0}")]
    InvalidName(#[from] rudder_types::FieldViolation),

    /// Storage engine failure.
    #[error("storage backend: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the error is the unique-name violation, for callers mapping it
    /// to a conflict response.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
