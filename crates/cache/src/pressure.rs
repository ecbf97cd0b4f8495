//! Memory pressure classification
//!
//! Turns an available-memory reading into a coarse [`PressureLevel`] using
//! configurable band boundaries. Classification is a pure function of the
//! reading and the thresholds.

use std::fmt;

const MB: u64 = 1024 * 1024;

/// Memory pressure level, ordered from healthy to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureLevel {
    /// Plenty of memory available
    Low,
    /// Available memory is getting tight
    Moderate,
    /// Caches should shrink and loading should pause
    High,
    /// Forced reclamation is required
    Critical,
}

impl PressureLevel {
    /// Returns true if the level requires shedding memory (High or Critical)
    pub fn needs_eviction(&self) -> bool {
        matches!(self, PressureLevel::High | PressureLevel::Critical)
    }

    /// Returns true if forced reclamation should run
    pub fn is_critical(&self) -> bool {
        matches!(self, PressureLevel::Critical)
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureLevel::Low => "low",
            PressureLevel::Moderate => "moderate",
            PressureLevel::High => "high",
            PressureLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Band boundaries on available memory, in bytes
///
/// - `available >= low` → [`PressureLevel::Low`]
/// - `moderate <= available < low` → [`PressureLevel::Moderate`]
/// - `high <= available < moderate` → [`PressureLevel::High`]
/// - `available < high` → [`PressureLevel::Critical`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureThresholds {
    /// Minimum available bytes for low pressure
    pub low: u64,
    /// Minimum available bytes for moderate pressure
    pub moderate: u64,
    /// Minimum available bytes for high pressure; anything below is critical
    pub high: u64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self::from_mb(200, 50, 10)
    }
}

impl PressureThresholds {
    /// Create thresholds from byte values
    pub fn new(low: u64, moderate: u64, high: u64) -> Self {
        Self {
            low,
            moderate,
            high,
        }
    }

    /// Create thresholds from megabyte values
    ///
    /// Values too large to express in bytes saturate at `u64::MAX`.
    pub fn from_mb(low_mb: u64, moderate_mb: u64, high_mb: u64) -> Self {
        Self::new(
            low_mb.saturating_mul(MB),
            moderate_mb.saturating_mul(MB),
            high_mb.saturating_mul(MB),
        )
    }

    /// Create thresholds from megabyte values, or `None` if any value
    /// overflows when converted to bytes
    pub fn checked_from_mb(low_mb: u64, moderate_mb: u64, high_mb: u64) -> Option<Self> {
        Some(Self::new(
            low_mb.checked_mul(MB)?,
            moderate_mb.checked_mul(MB)?,
            high_mb.checked_mul(MB)?,
        ))
    }

    /// Whether the bands are ordered `low >= moderate >= high`
    pub fn is_ordered(&self) -> bool {
        self.low >= self.moderate && self.moderate >= self.high
    }

    /// Classify an available-memory reading
    pub fn classify(&self, available_bytes: u64) -> PressureLevel {
        if available_bytes >= self.low {
            PressureLevel::Low
        } else if available_bytes >= self.moderate {
            PressureLevel::Moderate
        } else if available_bytes >= self.high {
            PressureLevel::High
        } else {
            PressureLevel::Critical
        }
    }
}
