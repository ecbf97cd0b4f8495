//! Stockroom Core Library
//!
//! Filter state model and the query collaborator contract for the
//! inventory search layer.

pub mod filter;
pub mod manager;
pub mod persistence;
pub mod repository;

pub use filter::{FilterState, FilterType};
pub use manager::FilterManager;
pub use persistence::{load_filter_state, save_filter_state, PersistenceError, PersistenceResult};
pub use repository::{ItemRepository, RepositoryError, RepositoryResult};
