//! Filter state persistence
//!
//! Saves and restores the user's filter selection as a small JSON file so a
//! search can be resumed after the process restarts.

use crate::filter::FilterState;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Error types for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Save a filter state to `path` as pretty-printed JSON
///
/// The file is written to a temporary sibling first and renamed into place,
/// so a crash mid-write never leaves a truncated file behind.
pub fn save_filter_state(path: &Path, state: &FilterState) -> PersistenceResult<()> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json)?;
    fs::rename(&temp_path, path)?;

    debug!(path = %path.display(), "filter state saved");
    Ok(())
}

/// Load a filter state from `path`
///
/// Returns `Ok(None)` if nothing has been saved there yet.
pub fn load_filter_state(path: &Path) -> PersistenceResult<Option<FilterState>> {
    if !path.exists() {
        return Ok(None);
    }

    let json = fs::read_to_string(path)?;
    let state: FilterState = serde_json::from_str(&json)
        .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;

    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FilterManager, FilterType};
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filters.json");

        let state = FilterState::new()
            .with_sizes([100, 110])
            .with_categories(["Shoes"])
            .with_search_text("  leather");
        save_filter_state(&path, &state).unwrap();

        let loaded = load_filter_state(&path).unwrap();
        assert_eq!(loaded, Some(state));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let loaded = load_filter_state(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filters.json");
        fs::write(&path, "{ not json").unwrap();

        let result = load_filter_state(&path);
        assert!(matches!(result, Err(PersistenceError::Deserialization(_))));
    }

    #[test]
    fn test_manager_restore_from() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filters.json");

        let mut original = FilterManager::new();
        original.update_filter(FilterType::Color, ["Red", "Blue"]);
        save_filter_state(&path, &original.current_state()).unwrap();

        let mut restored = FilterManager::new();
        let state = restored.restore_from(&path).unwrap();
        assert_eq!(state, Some(original.current_state()));
        assert_eq!(restored.current_state(), original.current_state());
    }

    #[test]
    fn test_manager_restore_missing_keeps_state() {
        let dir = TempDir::new().unwrap();
        let mut manager = FilterManager::new();
        manager.update_search_text("boots");

        let state = manager.restore_from(&dir.path().join("missing.json")).unwrap();
        assert!(state.is_none());
        assert_eq!(manager.current_state().search_text(), "boots");
    }
}
