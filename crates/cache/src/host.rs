//! Host memory readings
//!
//! The monitor samples available memory through [`MemorySource`]. On Linux
//! the reading comes from `MemAvailable` in `/proc/meminfo`; tests and
//! platforms that deliver pressure through callbacks use
//! [`SimulatedMemorySource`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Errors that can occur while sampling the host
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    /// The metric could not be read at all
    #[error("memory metric unavailable: {0}")]
    Unavailable(String),

    /// The metric was read but could not be understood
    #[error("malformed memory metric: {0}")]
    Malformed(String),
}

/// Source of available-memory readings
pub trait MemorySource: Send + Sync {
    /// Currently available memory in bytes
    fn available_bytes(&self) -> Result<u64, SampleError>;
}

impl<F> MemorySource for F
where
    F: Fn() -> Result<u64, SampleError> + Send + Sync,
{
    fn available_bytes(&self) -> Result<u64, SampleError> {
        self()
    }
}

/// Reads `MemAvailable` from a meminfo file
#[derive(Debug, Clone)]
pub struct ProcMeminfoSource {
    path: PathBuf,
}

impl ProcMeminfoSource {
    /// Read from `/proc/meminfo`
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    /// Read from a meminfo-formatted file at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ProcMeminfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for ProcMeminfoSource {
    fn available_bytes(&self) -> Result<u64, SampleError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| SampleError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        parse_mem_available(&contents)
    }
}

/// Extract `MemAvailable` (reported in kB) from meminfo contents, in bytes
pub fn parse_mem_available(contents: &str) -> Result<u64, SampleError> {
    let line = contents
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .ok_or_else(|| SampleError::Malformed("missing MemAvailable".to_string()))?;

    let kb = line
        .trim_start_matches("MemAvailable:")
        .split_whitespace()
        .next()
        .ok_or_else(|| SampleError::Malformed("empty MemAvailable".to_string()))?
        .parse::<u64>()
        .map_err(|e| SampleError::Malformed(format!("MemAvailable: {}", e)))?;

    Ok(kb.saturating_mul(1024))
}

/// Settable reading for tests and callback-driven platforms
///
/// Starts out reporting `u64::MAX` (no pressure). Marking it unavailable
/// makes every sample fail until a new value is set.
#[derive(Debug)]
pub struct SimulatedMemorySource {
    available: AtomicU64,
    unavailable: AtomicBool,
}

impl SimulatedMemorySource {
    /// Create a source reporting `available` bytes
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Report `available` bytes from now on
    pub fn set_available(&self, available: u64) {
        self.available.store(available, Ordering::Release);
        self.unavailable.store(false, Ordering::Release);
    }

    /// Make every subsequent sample fail
    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::Release);
    }
}

impl Default for SimulatedMemorySource {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl MemorySource for SimulatedMemorySource {
    fn available_bytes(&self) -> Result<u64, SampleError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(SampleError::Unavailable("simulated outage".to_string()));
        }
        Ok(self.available.load(Ordering::Acquire))
    }
}
