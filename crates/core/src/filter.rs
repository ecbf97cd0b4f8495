//! Filter state model
//!
//! A [`FilterState`] is an immutable snapshot of the active size, color and
//! category selections plus the free-text search. Every mutation goes through
//! [`crate::FilterManager`], which derives a new snapshot instead of editing
//! one in place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Filter dimension addressed by the set-valued operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Numeric item sizes
    Size,
    /// Color names
    Color,
    /// Category names
    Category,
}

impl FilterType {
    /// All set-valued dimensions in display order
    pub const ALL: [FilterType; 3] = [FilterType::Size, FilterType::Color, FilterType::Category];

    /// Human-readable label used in display strings
    pub fn label(&self) -> &'static str {
        match self {
            FilterType::Size => "Size",
            FilterType::Color => "Color",
            FilterType::Category => "Category",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable snapshot of active filter criteria
///
/// Sets are stored as `BTreeSet`s so iteration is always sorted and two
/// states built from the same members in a different order compare equal.
/// An empty state (no members, blank search text) means "no filtering".
///
/// # Example
///
/// ```
/// use stockroom_core::FilterState;
///
/// let state = FilterState::new()
///     .with_sizes([110, 100])
///     .with_search_text("boots");
///
/// assert!(state.has_active_filters());
/// assert_eq!(state.active_filter_count(), 3);
/// assert_eq!(state.to_display_string(), "Size: 100, 110 | Search: boots");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    size_filters: BTreeSet<u32>,
    #[serde(default)]
    color_filters: BTreeSet<String>,
    #[serde(default)]
    category_filters: BTreeSet<String>,
    #[serde(default)]
    search_text: String,
}

impl FilterState {
    /// Create an empty filter state
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with the size set replaced
    ///
    /// Zero is not a valid size and is dropped.
    pub fn with_sizes<I: IntoIterator<Item = u32>>(mut self, sizes: I) -> Self {
        self.size_filters = sizes.into_iter().filter(|size| *size > 0).collect();
        self
    }

    /// Return a copy with the color set replaced
    pub fn with_colors<I, S>(mut self, colors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.color_filters = normalize_names(colors);
        self
    }

    /// Return a copy with the category set replaced
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.category_filters = normalize_names(categories);
        self
    }

    /// Return a copy with the search text replaced verbatim
    pub fn with_search_text(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    /// Selected sizes in ascending order
    pub fn size_filters(&self) -> &BTreeSet<u32> {
        &self.size_filters
    }

    /// Selected colors in lexicographic order
    pub fn color_filters(&self) -> &BTreeSet<String> {
        &self.color_filters
    }

    /// Selected categories in lexicographic order
    pub fn category_filters(&self) -> &BTreeSet<String> {
        &self.category_filters
    }

    /// Search text exactly as it was entered
    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    /// Whether the search text contains any non-whitespace character
    pub fn has_search_text(&self) -> bool {
        !self.search_text.trim().is_empty()
    }

    /// Whether any dimension narrows the result set
    pub fn has_active_filters(&self) -> bool {
        !self.size_filters.is_empty()
            || !self.color_filters.is_empty()
            || !self.category_filters.is_empty()
            || self.has_search_text()
    }

    /// Whether this state means "return everything"
    pub fn is_empty(&self) -> bool {
        !self.has_active_filters()
    }

    /// Number of selected set members plus one for active search text
    pub fn active_filter_count(&self) -> usize {
        self.size_filters.len()
            + self.color_filters.len()
            + self.category_filters.len()
            + usize::from(self.has_search_text())
    }

    /// Number of members selected in one dimension
    pub fn count_for(&self, filter_type: FilterType) -> usize {
        match filter_type {
            FilterType::Size => self.size_filters.len(),
            FilterType::Color => self.color_filters.len(),
            FilterType::Category => self.category_filters.len(),
        }
    }

    /// Build a human-readable summary of the active filters
    ///
    /// One clause per active dimension in the order size, color, category,
    /// search, joined by `" | "`. Returns an empty string when nothing is
    /// active.
    pub fn to_display_string(&self) -> String {
        let mut clauses = Vec::with_capacity(4);

        if !self.size_filters.is_empty() {
            clauses.push(format!("{}: {}", FilterType::Size, join(&self.size_filters)));
        }
        if !self.color_filters.is_empty() {
            clauses.push(format!("{}: {}", FilterType::Color, join(&self.color_filters)));
        }
        if !self.category_filters.is_empty() {
            clauses.push(format!(
                "{}: {}",
                FilterType::Category,
                join(&self.category_filters)
            ));
        }
        if self.has_search_text() {
            clauses.push(format!("Search: {}", self.search_text.trim()));
        }

        clauses.join(" | ")
    }

    pub(crate) fn replace_sizes(&self, sizes: BTreeSet<u32>) -> Self {
        Self {
            size_filters: sizes,
            ..self.clone()
        }
    }

    pub(crate) fn replace_colors(&self, colors: BTreeSet<String>) -> Self {
        Self {
            color_filters: colors,
            ..self.clone()
        }
    }

    pub(crate) fn replace_categories(&self, categories: BTreeSet<String>) -> Self {
        Self {
            category_filters: categories,
            ..self.clone()
        }
    }
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

/// Parse a raw size selection
///
/// Returns `None` for anything that is not a positive integer.
pub(crate) fn parse_size(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|size| *size > 0)
}

/// Trim a raw color/category value, rejecting blanks
pub(crate) fn normalize_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn normalize_names<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|value| normalize_name(value.as_ref()))
        .collect()
}

fn join<T: fmt::Display>(values: &BTreeSet<T>) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
