//! Filter state controller
//!
//! Applies filter commands issued by the UI and keeps the current
//! [`FilterState`]. Each operation derives a new snapshot, stores it as
//! current and returns a copy, so callers never hold a reference into the
//! manager's own state.

use crate::filter::{normalize_name, parse_size, FilterState, FilterType};
use crate::persistence::{load_filter_state, PersistenceResult};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Stateful controller for filter mutations
///
/// Not internally synchronized; it is owned by the context that issues
/// queries. The snapshots it hands out are plain values and can be shared
/// across threads freely.
///
/// # Example
///
/// ```
/// use stockroom_core::{FilterManager, FilterType};
///
/// let mut manager = FilterManager::new();
/// let state = manager.update_filter(FilterType::Size, ["100", "abc", "-5", "110"]);
/// assert_eq!(state.size_filters().len(), 2);
///
/// let state = manager.update_search_text("boots");
/// assert_eq!(state.active_filter_count(), 3);
/// ```
#[derive(Debug, Default)]
pub struct FilterManager {
    current: FilterState,
}

impl FilterManager {
    /// Create a manager starting from the empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager starting from a given state
    pub fn with_state(state: FilterState) -> Self {
        Self { current: state }
    }

    /// Replace one dimension wholesale with the parsed raw values
    ///
    /// Sizes that are not positive integers are dropped. Colors and
    /// categories are trimmed and blank values are dropped. Nothing here
    /// raises an error.
    pub fn update_filter<I, S>(&mut self, filter_type: FilterType, raw_values: I) -> FilterState
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = match filter_type {
            FilterType::Size => {
                let sizes: BTreeSet<u32> = raw_values
                    .into_iter()
                    .filter_map(|raw| parse_size(raw.as_ref()))
                    .collect();
                self.current.replace_sizes(sizes)
            }
            FilterType::Color => self.current.replace_colors(names(raw_values)),
            FilterType::Category => self.current.replace_categories(names(raw_values)),
        };

        debug!(
            filter = %filter_type,
            count = next.count_for(filter_type),
            "filter updated"
        );
        self.commit(next)
    }

    /// Remove a single member from one dimension
    ///
    /// Sizes are matched by parsed value, names by trimmed value. Removing
    /// something that is not selected leaves the state unchanged.
    pub fn remove_filter(&mut self, filter_type: FilterType, value: &str) -> FilterState {
        let next = match filter_type {
            FilterType::Size => match parse_size(value) {
                Some(size) if self.current.size_filters().contains(&size) => {
                    let mut sizes = self.current.size_filters().clone();
                    sizes.remove(&size);
                    self.current.replace_sizes(sizes)
                }
                _ => self.current.clone(),
            },
            FilterType::Color => match normalize_name(value) {
                Some(name) if self.current.color_filters().contains(&name) => {
                    let mut colors = self.current.color_filters().clone();
                    colors.remove(&name);
                    self.current.replace_colors(colors)
                }
                _ => self.current.clone(),
            },
            FilterType::Category => match normalize_name(value) {
                Some(name) if self.current.category_filters().contains(&name) => {
                    let mut categories = self.current.category_filters().clone();
                    categories.remove(&name);
                    self.current.replace_categories(categories)
                }
                _ => self.current.clone(),
            },
        };

        self.commit(next)
    }

    /// Empty exactly one dimension
    pub fn clear_filter(&mut self, filter_type: FilterType) -> FilterState {
        let next = match filter_type {
            FilterType::Size => self.current.replace_sizes(BTreeSet::new()),
            FilterType::Color => self.current.replace_colors(BTreeSet::new()),
            FilterType::Category => self.current.replace_categories(BTreeSet::new()),
        };
        self.commit(next)
    }

    /// Reset to the empty state, search text included
    pub fn clear_all_filters(&mut self) -> FilterState {
        debug!("all filters cleared");
        self.commit(FilterState::new())
    }

    /// Replace the search text verbatim
    pub fn update_search_text(&mut self, text: impl Into<String>) -> FilterState {
        let next = self.current.clone().with_search_text(text);
        self.commit(next)
    }

    /// Snapshot of the current state
    pub fn current_state(&self) -> FilterState {
        self.current.clone()
    }

    /// Replace the whole state, e.g. when restoring a persisted selection
    pub fn set_state(&mut self, state: FilterState) -> FilterState {
        self.commit(state)
    }

    /// Restore the state saved at `path`
    ///
    /// Returns `Ok(None)` and leaves the current state alone when nothing
    /// was saved there.
    pub fn restore_from(&mut self, path: &Path) -> PersistenceResult<Option<FilterState>> {
        match load_filter_state(path)? {
            Some(state) => Ok(Some(self.set_state(state))),
            None => Ok(None),
        }
    }

    /// Whether the current state narrows the result set
    pub fn has_active_filters(&self) -> bool {
        self.current.has_active_filters()
    }

    /// Active filter count of the current state
    pub fn active_filter_count(&self) -> usize {
        self.current.active_filter_count()
    }

    fn commit(&mut self, next: FilterState) -> FilterState {
        self.current = next;
        self.current.clone()
    }
}

fn names<I, S>(raw_values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw_values
        .into_iter()
        .filter_map(|raw| normalize_name(raw.as_ref()))
        .collect()
}
