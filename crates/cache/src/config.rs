//! Cache configuration system for search cache sizing and pressure policy.
//!
//! Configuration can be loaded from a TOML file, environment variables, or
//! created programmatically. The same values size the search cache, set the
//! memory pressure bands and sampling tick, and pick the loader batch size.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pressure::PressureThresholds;
use crate::search::PressurePolicy;

/// Default search cache capacity
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default progressive loading batch size
pub const DEFAULT_BATCH_SIZE: usize = 20;

const ENV_MAX_ENTRIES: &str = "STOCKROOM_CACHE_MAX_ENTRIES";
const ENV_LOW_THRESHOLD: &str = "STOCKROOM_LOW_THRESHOLD_MB";
const ENV_MODERATE_THRESHOLD: &str = "STOCKROOM_MODERATE_THRESHOLD_MB";
const ENV_HIGH_THRESHOLD: &str = "STOCKROOM_HIGH_THRESHOLD_MB";
const ENV_SAMPLE_INTERVAL: &str = "STOCKROOM_SAMPLE_INTERVAL_MS";
const ENV_BATCH_SIZE: &str = "STOCKROOM_BATCH_SIZE";
const ENV_PRESSURE_POLICY: &str = "STOCKROOM_PRESSURE_POLICY";

/// Configuration for the search caching layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached result lists
    pub max_entries: usize,
    /// Available memory (MB) at or above which pressure is low
    pub low_threshold_mb: u64,
    /// Available memory (MB) at or above which pressure is moderate
    pub moderate_threshold_mb: u64,
    /// Available memory (MB) at or above which pressure is high; below is critical
    pub high_threshold_mb: u64,
    /// Memory sampling interval in milliseconds
    pub sample_interval_ms: u64,
    /// Number of items fetched per progressive loading batch
    pub batch_size: usize,
    /// How the search cache shrinks under memory pressure
    pub pressure_policy: PressurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            low_threshold_mb: 200,
            moderate_threshold_mb: 50,
            high_threshold_mb: 10,
            sample_interval_ms: 1000,
            batch_size: DEFAULT_BATCH_SIZE,
            pressure_policy: PressurePolicy::Halve,
        }
    }
}

impl CacheConfig {
    /// Sets the search cache capacity.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the pressure band boundaries in megabytes.
    pub fn with_thresholds_mb(mut self, low: u64, moderate: u64, high: u64) -> Self {
        self.low_threshold_mb = low;
        self.moderate_threshold_mb = moderate;
        self.high_threshold_mb = high;
        self
    }

    /// Sets the memory sampling interval.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the progressive loading batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the memory pressure policy.
    pub fn with_pressure_policy(mut self, policy: PressurePolicy) -> Self {
        self.pressure_policy = policy;
        self
    }

    /// Returns the pressure band boundaries.
    pub fn thresholds(&self) -> PressureThresholds {
        PressureThresholds::from_mb(
            self.low_threshold_mb,
            self.moderate_threshold_mb,
            self.high_threshold_mb,
        )
    }

    /// Returns the memory sampling interval.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Returns the default configuration file location for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/stockroom/cache.toml
    /// - Linux: ~/.config/stockroom/cache.toml
    /// - Windows: %APPDATA%\stockroom\cache.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("stockroom").join("cache.toml")
        } else {
            // Fallback to current directory if config dir unavailable
            PathBuf::from("stockroom-cache.toml")
        }
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    /// Returns an error for a zero capacity or batch size, a zero sampling
    /// interval, thresholds that overflow when converted to bytes, or
    /// pressure bands that are not descending.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue("max_entries".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batch_size".to_string()));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("sample_interval_ms".to_string()));
        }
        let thresholds = PressureThresholds::checked_from_mb(
            self.low_threshold_mb,
            self.moderate_threshold_mb,
            self.high_threshold_mb,
        )
        .ok_or_else(|| {
            ConfigError::InvalidValue("thresholds too large to express in bytes".to_string())
        })?;
        if !thresholds.is_ordered() {
            return Err(ConfigError::InvalidValue(
                "thresholds must satisfy low >= moderate >= high".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `STOCKROOM_CACHE_MAX_ENTRIES`: search cache capacity (default: 50)
    /// - `STOCKROOM_LOW_THRESHOLD_MB`: low pressure bound (default: 200)
    /// - `STOCKROOM_MODERATE_THRESHOLD_MB`: moderate pressure bound (default: 50)
    /// - `STOCKROOM_HIGH_THRESHOLD_MB`: high pressure bound (default: 10)
    /// - `STOCKROOM_SAMPLE_INTERVAL_MS`: sampling tick (default: 1000)
    /// - `STOCKROOM_BATCH_SIZE`: progressive loading batch size (default: 20)
    /// - `STOCKROOM_PRESSURE_POLICY`: `halve` or `clear` (default: halve)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Applies environment variable overrides to this configuration.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_parse(ENV_MAX_ENTRIES)? {
            self.max_entries = value;
        }
        if let Some(value) = env_parse(ENV_LOW_THRESHOLD)? {
            self.low_threshold_mb = value;
        }
        if let Some(value) = env_parse(ENV_MODERATE_THRESHOLD)? {
            self.moderate_threshold_mb = value;
        }
        if let Some(value) = env_parse(ENV_HIGH_THRESHOLD)? {
            self.high_threshold_mb = value;
        }
        if let Some(value) = env_parse(ENV_SAMPLE_INTERVAL)? {
            self.sample_interval_ms = value;
        }
        if let Some(value) = env_parse(ENV_BATCH_SIZE)? {
            self.batch_size = value;
        }
        if let Some(value) = env_parse(ENV_PRESSURE_POLICY)? {
            self.pressure_policy = value;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (every key optional):
    /// ```toml
    /// max_entries = 50
    /// low_threshold_mb = 200
    /// moderate_threshold_mb = 50
    /// high_threshold_mb = 10
    /// sample_interval_ms = 1000
    /// batch_size = 20
    /// pressure_policy = "halve"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&contents)?;
        info!(path = %path.as_ref().display(), "loaded cache configuration");
        Ok(config)
    }

    /// Loads the file at `path` if it exists, then applies environment
    /// overrides and validates the result.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let base = if path.as_ref().exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        let config = base.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = self.to_toml()?;
        fs::write(path.as_ref(), toml)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed TOML
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pressure::PressureLevel;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    const ALL_VARS: [&str; 7] = [
        ENV_MAX_ENTRIES,
        ENV_LOW_THRESHOLD,
        ENV_MODERATE_THRESHOLD,
        ENV_HIGH_THRESHOLD,
        ENV_SAMPLE_INTERVAL,
        ENV_BATCH_SIZE,
        ENV_PRESSURE_POLICY,
    ];

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.sample_interval(), Duration::from_secs(1));
        assert_eq!(config.pressure_policy, PressurePolicy::Halve);
        assert_eq!(config.thresholds(), PressureThresholds::from_mb(200, 50, 10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_max_entries(10)
            .with_thresholds_mb(400, 100, 20)
            .with_sample_interval(Duration::from_millis(250))
            .with_batch_size(5)
            .with_pressure_policy(PressurePolicy::Clear);

        assert_eq!(config.max_entries, 10);
        assert_eq!(config.thresholds().classify(150 * 1024 * 1024), PressureLevel::Moderate);
        assert_eq!(config.sample_interval_ms, 250);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.pressure_policy, PressurePolicy::Clear);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CacheConfig::default().with_max_entries(0).validate().is_err());
        assert!(CacheConfig::default().with_batch_size(0).validate().is_err());
        assert!(CacheConfig::default()
            .with_sample_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CacheConfig::default()
            .with_thresholds_mb(10, 50, 200)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_threshold() {
        let config = CacheConfig::default().with_thresholds_mb(u64::MAX / 1024, 50, 10);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
        // Byte conversion saturates instead of wrapping
        assert_eq!(config.thresholds().low, u64::MAX);
    }

    #[test]
    #[serial]
    fn test_load_rejects_overflowing_env_threshold() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }
        env::set_var(ENV_LOW_THRESHOLD, u64::MAX.to_string());

        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CacheConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_default_config_path() {
        let path = CacheConfig::default_config_path();
        assert!(path.ends_with("cache.toml") || path.ends_with("stockroom-cache.toml"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_MAX_ENTRIES, "12");
        env::set_var(ENV_LOW_THRESHOLD, "300");
        env::set_var(ENV_MODERATE_THRESHOLD, "80");
        env::set_var(ENV_HIGH_THRESHOLD, "15");
        env::set_var(ENV_SAMPLE_INTERVAL, "500");
        env::set_var(ENV_BATCH_SIZE, "8");
        env::set_var(ENV_PRESSURE_POLICY, "clear");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_entries, 12);
        assert_eq!(config.thresholds(), PressureThresholds::from_mb(300, 80, 15));
        assert_eq!(config.sample_interval_ms, 500);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.pressure_policy, PressurePolicy::Clear);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&ALL_VARS);

        for name in ALL_VARS {
            env::remove_var(name);
        }
        env::set_var(ENV_BATCH_SIZE, "40");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 40);
        assert_eq!(config.max_entries, 50); // default
        assert_eq!(config.pressure_policy, PressurePolicy::Halve); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_MAX_ENTRIES, "not_a_number");
        assert!(CacheConfig::from_env().is_err());

        env::set_var(ENV_MAX_ENTRIES, "5");
        env::set_var(ENV_PRESSURE_POLICY, "shrink");
        assert!(CacheConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }

        let dir = TempDir::new().unwrap();
        let config = CacheConfig::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_env_overrides_file() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.toml");
        fs::write(&path, "max_entries = 7\nbatch_size = 3\n").unwrap();
        env::set_var(ENV_BATCH_SIZE, "9");

        let config = CacheConfig::load(&path).unwrap();
        assert_eq!(config.max_entries, 7);
        assert_eq!(config.batch_size, 9);
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_result() {
        let _guard = EnvGuard::new(&ALL_VARS);
        for name in ALL_VARS {
            env::remove_var(name);
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.toml");
        fs::write(&path, "max_entries = 0\n").unwrap();

        assert!(matches!(
            CacheConfig::load(&path),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CacheConfig::default()
            .with_max_entries(12)
            .with_pressure_policy(PressurePolicy::Clear);
        let toml = config.to_toml().unwrap();
        let parsed = CacheConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            # Test configuration
            max_entries = 25
            low_threshold_mb = 256
            moderate_threshold_mb = 64
            high_threshold_mb = 16
            sample_interval_ms = 2000
            batch_size = 10
            pressure_policy = "clear"
        "#;

        let config = CacheConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_entries, 25);
        assert_eq!(config.thresholds(), PressureThresholds::from_mb(256, 64, 16));
        assert_eq!(config.sample_interval_ms, 2000);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.pressure_policy, PressurePolicy::Clear);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml("max_entries = 5\n").unwrap();
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.batch_size, 20); // default
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(matches!(
            CacheConfig::from_toml("max_entries = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(CacheConfig::from_toml("pressure_policy = \"shrink\"").is_err());
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("cache.toml");

        let config = CacheConfig::default().with_batch_size(33);
        config.save_to_file(&config_path).unwrap();

        let loaded = CacheConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);
    }
}
