//! Search result cache with LRU eviction
//!
//! Caches the result list of a filtered query keyed by a canonical encoding
//! of the [`FilterState`], so two states selecting the same members in a
//! different order share one entry. The cache is bounded by entry count and
//! evicts the least recently used entry when full.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use stockroom_core::FilterState;
use tracing::debug;

use crate::monitor::Reclaimable;

/// Canonical cache key derived from a [`FilterState`]
///
/// Each set is encoded in sorted order and every string member is length
/// prefixed, so members containing separator characters cannot make two
/// different states collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// The encoded key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate the cache key for a filter state
///
/// Members of each set are sorted before they are combined with the search
/// text, which is used verbatim.
pub fn generate_key(filter: &FilterState) -> CacheKey {
    let mut sizes: Vec<u32> = filter.size_filters().iter().copied().collect();
    sizes.sort_unstable();

    let sizes = sizes
        .iter()
        .map(|size| size.to_string())
        .collect::<Vec<_>>()
        .join(",");

    CacheKey(format!(
        "size=[{}];color=[{}];category=[{}];search={}:{}",
        sizes,
        encode_names(filter.color_filters().iter()),
        encode_names(filter.category_filters().iter()),
        filter.search_text().len(),
        filter.search_text(),
    ))
}

fn encode_names<'a, I: Iterator<Item = &'a String>>(names: I) -> String {
    let mut names: Vec<&String> = names.collect();
    names.sort();
    names
        .iter()
        .map(|name| format!("{}:{}", name.len(), name))
        .collect::<Vec<_>>()
        .join(",")
}

/// How the cache shrinks when memory pressure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressurePolicy {
    /// Evict least recently used entries down to half the capacity,
    /// always dropping at least one entry
    #[default]
    Halve,
    /// Drop every entry
    Clear,
}

impl FromStr for PressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "halve" => Ok(PressurePolicy::Halve),
            "clear" => Ok(PressurePolicy::Clear),
            other => Err(format!("unknown pressure policy: {}", other)),
        }
    }
}

impl fmt::Display for PressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PressurePolicy::Halve => f.write_str("halve"),
            PressurePolicy::Clear => f.write_str("clear"),
        }
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in cache
    pub entries: usize,

    /// Maximum number of entries
    pub max_entries: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Entries evicted to make room for new ones
    pub evictions: u64,

    /// Entries dropped in response to memory pressure
    pub pressure_evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Internal cache state
struct CacheState<T> {
    /// Map from cache key to result list
    entries: HashMap<CacheKey, Arc<Vec<T>>>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<CacheKey>,

    /// Maximum number of entries
    max_entries: usize,

    /// Statistics
    stats: CacheStats,
}

impl<T> CacheState<T> {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_entries,
            stats: CacheStats {
                max_entries,
                ..Default::default()
            },
        }
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, key: &CacheKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    /// Remove the least recently used entry
    fn pop_lru(&mut self) -> Option<CacheKey> {
        let key = self.lru_queue.pop_front()?;
        self.entries.remove(&key);
        self.stats.entries = self.entries.len();
        Some(key)
    }

    /// Evict entries until at most `target` remain
    fn evict_down_to(&mut self, target: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > target {
            match self.pop_lru() {
                Some(key) => {
                    debug!(key = %key, "evicted search cache entry");
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

/// Filtered search result cache with LRU eviction
///
/// Thread-safe: every public operation takes the same lock, so concurrent
/// `put`/`get` calls and pressure-driven shrinking never observe a
/// half-updated LRU order or an oversized cache. Cached lists are shared as
/// `Arc<Vec<T>>`; a hit hands out another reference, not a copy.
///
/// # Example
///
/// ```
/// use stockroom_cache::SearchCache;
/// use stockroom_core::FilterState;
///
/// let cache: SearchCache<u32> = SearchCache::new(3);
/// let filter = FilterState::new().with_colors(["Red"]);
///
/// assert!(cache.get(&filter).is_none());
/// cache.put(&filter, vec![1, 2, 3]);
///
/// let items = cache.get(&filter).expect("cached");
/// assert_eq!(*items, vec![1, 2, 3]);
/// assert_eq!(cache.hit_count(), 1);
/// assert_eq!(cache.miss_count(), 1);
/// ```
pub struct SearchCache<T> {
    state: Mutex<CacheState<T>>,
    policy: PressurePolicy,
}

impl<T> SearchCache<T> {
    /// Create a cache holding at most `max_entries` result lists
    ///
    /// A capacity of zero is raised to one.
    pub fn new(max_entries: usize) -> Self {
        Self::with_policy(max_entries, PressurePolicy::default())
    }

    /// Create a cache with an explicit memory pressure policy
    pub fn with_policy(max_entries: usize, policy: PressurePolicy) -> Self {
        Self {
            state: Mutex::new(CacheState::new(max_entries.max(1))),
            policy,
        }
    }

    /// Create a cache sized and configured from a [`crate::CacheConfig`]
    pub fn from_config(config: &crate::CacheConfig) -> Self {
        Self::with_policy(config.max_entries, config.pressure_policy)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the results for `filter`
    ///
    /// Overwrites any existing entry for the same key and marks it most
    /// recently used. Inserting a new key into a full cache evicts the least
    /// recently used entry first.
    pub fn put(&self, filter: &FilterState, items: Vec<T>) {
        self.put_shared(filter, Arc::new(items));
    }

    /// Store an already shared result list
    pub fn put_shared(&self, filter: &FilterState, items: Arc<Vec<T>>) {
        let key = generate_key(filter);
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= state.max_entries {
            let target = state.max_entries - 1;
            let evicted = state.evict_down_to(target);
            state.stats.evictions += evicted as u64;
        }

        debug!(key = %key, count = items.len(), "cached search results");
        state.entries.insert(key.clone(), items);
        state.touch(&key);
        state.stats.entries = state.entries.len();
    }

    /// Retrieve the results cached for `filter`
    ///
    /// A hit counts towards `hit_count` and marks the entry most recently
    /// used; a miss counts towards `miss_count`. A cached empty list is a
    /// hit.
    pub fn get(&self, filter: &FilterState) -> Option<Arc<Vec<T>>> {
        let key = generate_key(filter);
        let mut state = self.lock();

        if let Some(items) = state.entries.get(&key).cloned() {
            state.touch(&key);
            state.stats.hits += 1;
            debug!(key = %key, "search cache hit");
            Some(items)
        } else {
            state.stats.misses += 1;
            debug!(key = %key, "search cache miss");
            None
        }
    }

    /// Check for an entry without touching LRU order or statistics
    pub fn contains(&self, filter: &FilterState) -> bool {
        let key = generate_key(filter);
        self.lock().entries.contains_key(&key)
    }

    /// Remove the entry for `filter`
    pub fn remove(&self, filter: &FilterState) -> Option<Arc<Vec<T>>> {
        let key = generate_key(filter);
        let mut state = self.lock();

        let removed = state.entries.remove(&key)?;
        state.lru_queue.retain(|k| k != &key);
        state.stats.entries = state.entries.len();
        Some(removed)
    }

    /// Drop every entry; statistics are kept
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_queue.clear();
        state.stats.entries = 0;
    }

    /// Shrink the cache in response to memory pressure
    ///
    /// Under [`PressurePolicy::Halve`] the least recently used entries are
    /// evicted until at most `min(max_size / 2, len - 1)` remain. Under
    /// [`PressurePolicy::Clear`] the cache is emptied. Either way a
    /// non-empty cache is strictly smaller afterwards. Returns the number of
    /// entries dropped.
    pub fn on_memory_pressure(&self) -> usize {
        let mut state = self.lock();
        let len = state.entries.len();
        if len == 0 {
            return 0;
        }

        let target = match self.policy {
            PressurePolicy::Halve => (state.max_entries / 2).min(len - 1),
            PressurePolicy::Clear => 0,
        };
        let dropped = state.evict_down_to(target);
        state.stats.pressure_evictions += dropped as u64;

        debug!(
            policy = %self.policy,
            dropped,
            remaining = state.entries.len(),
            "search cache shrunk under memory pressure"
        );
        dropped
    }

    /// Change the capacity, evicting least recently used entries if needed
    pub fn set_max_size(&self, max_entries: usize) {
        let mut state = self.lock();
        state.max_entries = max_entries.max(1);
        state.stats.max_entries = state.max_entries;

        let target = state.max_entries;
        let evicted = state.evict_down_to(target);
        state.stats.evictions += evicted as u64;
    }

    /// Maximum number of entries
    pub fn max_size(&self) -> usize {
        self.lock().max_entries
    }

    /// Number of entries currently cached
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of hits since creation or the last [`reset_stats`](Self::reset_stats)
    pub fn hit_count(&self) -> u64 {
        self.lock().stats.hits
    }

    /// Number of misses since creation or the last [`reset_stats`](Self::reset_stats)
    pub fn miss_count(&self) -> u64 {
        self.lock().stats.misses
    }

    /// The configured memory pressure policy
    pub fn policy(&self) -> PressurePolicy {
        self.policy
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Zero the hit, miss and eviction counters
    pub fn reset_stats(&self) {
        let mut state = self.lock();
        let entries = state.entries.len();
        let max_entries = state.max_entries;
        state.stats = CacheStats {
            entries,
            max_entries,
            ..Default::default()
        };
    }
}

impl<T: Send + Sync> Reclaimable for SearchCache<T> {
    fn on_memory_pressure(&self) {
        SearchCache::on_memory_pressure(self);
    }

    fn reclaim(&self) {
        let mut state = self.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.lru_queue.clear();
        state.stats.entries = 0;
        state.stats.pressure_evictions += dropped as u64;
        debug!(dropped, "search cache reclaimed");
    }

    fn name(&self) -> &str {
        "search-cache"
    }
}

impl<T> Default for SearchCache<T> {
    /// Create a cache with the default capacity of 50 entries
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_ENTRIES)
    }
}
