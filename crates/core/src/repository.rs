//! Query collaborator contract
//!
//! The persistent item store lives outside this workspace. The cache and the
//! progressive loader only see it through [`ItemRepository`].

use crate::filter::FilterState;

/// Errors reported by an item repository
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// The backing store could not be reached
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed
    #[error("query failed: {0}")]
    Query(String),

    /// The request was abandoned before it completed
    #[error("query cancelled")]
    Cancelled,
}

/// Result type for repository queries
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Filtered item queries against the persistent store
///
/// Implementations own their timeout and retry policy. Errors are returned
/// to the caller unchanged; nothing in this workspace swallows them.
pub trait ItemRepository<T>: Send + Sync {
    /// Every item matching `filter`, unpaginated
    fn search_with_filters(&self, filter: &FilterState) -> RepositoryResult<Vec<T>>;

    /// At most `limit` items matching `filter`, starting at `offset`
    ///
    /// Ordering must be stable across calls so consecutive pages neither
    /// overlap nor skip items.
    fn search_with_pagination(
        &self,
        filter: &FilterState,
        offset: usize,
        limit: usize,
    ) -> RepositoryResult<Vec<T>>;
}
