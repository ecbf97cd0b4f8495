//! Stockroom Scheduler Library
//!
//! Progressive, memory-pressure-aware loading of filtered search results.
//!
//! A [`ProgressiveLoader`] pages through a repository query in fixed-size
//! batches, pausing while the host is under memory pressure and resuming
//! from the same offset once the pressure eases.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stockroom_cache::MemoryPressureMonitor;
//! use stockroom_core::{FilterState, ItemRepository, RepositoryResult};
//! use stockroom_scheduler::{LoaderState, ProgressiveLoader};
//!
//! struct Catalog(Vec<u32>);
//!
//! impl ItemRepository<u32> for Catalog {
//!     fn search_with_filters(&self, _filter: &FilterState) -> RepositoryResult<Vec<u32>> {
//!         Ok(self.0.clone())
//!     }
//!
//!     fn search_with_pagination(
//!         &self,
//!         _filter: &FilterState,
//!         offset: usize,
//!         limit: usize,
//!     ) -> RepositoryResult<Vec<u32>> {
//!         Ok(self.0.iter().skip(offset).take(limit).copied().collect())
//!     }
//! }
//!
//! let monitor = MemoryPressureMonitor::simulated();
//! let loader = Arc::new(ProgressiveLoader::new(Arc::new(Catalog((0..25).collect())), 10));
//! monitor.subscribe(loader.clone());
//!
//! loader.start_progressive_loading(&FilterState::new()).unwrap();
//! assert_eq!(loader.len(), 10);
//!
//! // High pressure pauses loading
//! monitor.simulate_memory_state(20 * 1024 * 1024);
//! assert!(loader.is_progressive_loading_paused());
//! loader.load_next_batch().unwrap();
//! assert_eq!(loader.len(), 10);
//!
//! // Relief resumes from the same offset
//! monitor.simulate_memory_state(500 * 1024 * 1024);
//! loader.load_all().unwrap();
//! assert_eq!(loader.items(), (0..25).collect::<Vec<_>>());
//! assert_eq!(loader.state(), LoaderState::Exhausted);
//! ```

mod cancel;
mod progressive;

// Re-export public API
pub use cancel::CancellationToken;
pub use progressive::{BatchOutcome, LoaderError, LoaderState, ProgressiveLoader, SkipReason};
