//! Stockroom Cache Library
//!
//! Filtered search result cache with LRU eviction, plus the memory pressure
//! monitor that shrinks it when the host runs low on memory.

pub mod config;
pub mod host;
pub mod monitor;
pub mod pressure;
pub mod query;
pub mod search;

pub use config::{CacheConfig, ConfigError};
pub use host::{MemorySource, ProcMeminfoSource, SampleError, SimulatedMemorySource};
pub use monitor::{
    ChannelSubscriber, MemoryPressureMonitor, MonitorError, PressureEvent, PressureSubscriber,
    Reclaimable, SubscriptionId,
};
pub use pressure::{PressureLevel, PressureThresholds};
pub use query::CachedSearch;
pub use search::{generate_key, CacheKey, CacheStats, PressurePolicy, SearchCache};
