//! Cache-through search front
//!
//! Answers whole-result-set queries from the [`SearchCache`] when it can and
//! falls back to the repository otherwise.

use std::sync::Arc;

use stockroom_core::{FilterState, ItemRepository, RepositoryResult};
use tracing::debug;

use crate::search::SearchCache;

/// Filtered search backed by a repository and a shared result cache
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use stockroom_cache::{CachedSearch, SearchCache};
/// use stockroom_core::{FilterState, ItemRepository, RepositoryResult};
///
/// struct Numbers;
///
/// impl ItemRepository<u32> for Numbers {
///     fn search_with_filters(&self, _filter: &FilterState) -> RepositoryResult<Vec<u32>> {
///         Ok((1..=5).collect())
///     }
///
///     fn search_with_pagination(
///         &self,
///         _filter: &FilterState,
///         offset: usize,
///         limit: usize,
///     ) -> RepositoryResult<Vec<u32>> {
///         Ok((1..=5).skip(offset).take(limit).collect())
///     }
/// }
///
/// let search = CachedSearch::new(Arc::new(Numbers), Arc::new(SearchCache::new(8)));
/// let filter = FilterState::new();
///
/// assert_eq!(*search.search(&filter).unwrap(), vec![1, 2, 3, 4, 5]);
/// assert_eq!(*search.search(&filter).unwrap(), vec![1, 2, 3, 4, 5]);
/// assert_eq!(search.cache().hit_count(), 1);
/// ```
pub struct CachedSearch<T> {
    repository: Arc<dyn ItemRepository<T>>,
    cache: Arc<SearchCache<T>>,
}

impl<T> CachedSearch<T> {
    /// Create a search front over `repository` sharing `cache`
    pub fn new(repository: Arc<dyn ItemRepository<T>>, cache: Arc<SearchCache<T>>) -> Self {
        Self { repository, cache }
    }

    /// Every item matching `filter`
    ///
    /// Served from the cache on a hit. On a miss the repository is queried
    /// and a successful result is cached. Repository errors are returned
    /// as-is and nothing is cached for them.
    pub fn search(&self, filter: &FilterState) -> RepositoryResult<Arc<Vec<T>>> {
        if let Some(items) = self.cache.get(filter) {
            return Ok(items);
        }

        let items = Arc::new(self.repository.search_with_filters(filter)?);
        debug!(
            filter = %filter,
            count = items.len(),
            "fetched search results from repository"
        );
        self.cache.put_shared(filter, Arc::clone(&items));
        Ok(items)
    }

    /// Drop every cached result, e.g. after the inventory changed
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Drop the cached result for one filter
    pub fn invalidate_filter(&self, filter: &FilterState) {
        self.cache.remove(filter);
    }

    /// The shared cache
    pub fn cache(&self) -> &Arc<SearchCache<T>> {
        &self.cache
    }
}
