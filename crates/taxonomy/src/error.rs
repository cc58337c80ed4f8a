//! Taxonomy error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the taxonomy engine.
///
/// Every mutation failure aborts the enclosing write batch; no partial
/// structural state is ever committed. Read operations return empty
/// collections for missing nodes — only single-node lookups fail with
/// [`TaxonomyError::NotFound`].
#[derive(Debug, Error)]
pub enum TaxonomyError {
    /// Missing id, code, or parent reference.
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Duplicate code or stale optimistic-concurrency version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested move would make a node its own ancestor.
    #[error("circular reference: {0}")]
    CircularReference(String),

    /// Delete blocked by the `Prevent` strategy.
    #[error("category {id} has {count} non-deleted children")]
    HasChildren { id: Uuid, count: usize },

    /// Delete blocked by unresolved attached leaf content.
    #[error("category {0} has attached content")]
    HasAttachedContent(Uuid),

    /// Inconsistent tree state encountered mid-operation (e.g. a subtree
    /// member referencing a parent outside that subtree).
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl TaxonomyError {
    /// Shorthand for a [`TaxonomyError::NotFound`] with a displayable key.
    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            what,
            key: key.to_string(),
        }
    }
}

/// Result type alias using [`TaxonomyError`].
pub type TaxonomyResult<T> = Result<T, TaxonomyError>;
