//! Cache configuration.
//!
//! Configuration can be loaded from and saved to a TOML file. Missing or
//! broken files fall back to defaults so the viewer always starts.

use mapview_common::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::budget::{FALLBACK_BUDGET, SECTION_FOOTPRINT_BYTES};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::executor::default_thread_count;

/// Configuration file name.
const CONFIG_FILE: &str = "mapview.toml";

/// Chunk cache configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// World directory to load chunks from (None = platform default)
    pub storage_root: Option<PathBuf>,
    /// Loader threads (0 = available parallelism)
    pub worker_threads: usize,
    /// Capacity of the chunk-loaded notification queue
    pub event_capacity: usize,
    /// Startup budget in chunks when available memory is unknown
    pub fallback_budget: usize,
    /// Estimated bytes per fully populated section
    pub section_footprint_bytes: usize,
    /// Viewport to size the cache for at startup, in pixels
    pub initial_viewport: Option<(u32, u32)>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_root: None,
            worker_threads: 0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            fallback_budget: FALLBACK_BUDGET,
            section_footprint_bytes: SECTION_FOOTPRINT_BYTES,
            initial_viewport: None,
        }
    }
}

impl CacheConfig {
    /// Load configuration from the default file location.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match Self::read(path) {
            Ok(mut config) => {
                info!("Loaded config from {}", path.display());
                config.validate();
                config
            },
            Err(e) => {
                warn!("Failed to load config file: {e}");
                Self::default()
            },
        }
    }

    /// Reads and parses a config file, reporting every failure.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, contents)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(config_dir) => config_dir.join("mapview").join(CONFIG_FILE),
            None => PathBuf::from(CONFIG_FILE),
        }
    }

    /// Clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.worker_threads = self.worker_threads.min(256);
        self.event_capacity = self.event_capacity.clamp(16, 1 << 20);
        self.fallback_budget = self.fallback_budget.max(1);
        self.section_footprint_bytes = self.section_footprint_bytes.max(1);
    }

    /// Number of loader threads to start.
    #[must_use]
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            default_thread_count()
        } else {
            self.worker_threads
        }
    }

    /// The configured world directory, or the platform default.
    #[must_use]
    pub fn resolved_storage_root(&self) -> PathBuf {
        self.storage_root
            .clone()
            .or_else(default_storage_root)
            .unwrap_or_default()
    }
}

/// Platform default game directory.
#[must_use]
pub fn default_storage_root() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir().map(|dir| dir.join("minecraft"))
    }

    #[cfg(target_os = "windows")]
    {
        dirs::config_dir().map(|dir| dir.join(".minecraft"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        dirs::home_dir().map(|home| home.join(".minecraft"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(config.fallback_budget, 10_000);
        assert!(config.storage_root.is_none());
        assert!(config.resolved_worker_threads() >= 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = CacheConfig {
            event_capacity: 0,
            fallback_budget: 0,
            section_footprint_bytes: 0,
            worker_threads: 10_000,
            ..CacheConfig::default()
        };

        config.validate();

        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.fallback_budget, 1);
        assert_eq!(config.section_footprint_bytes, 1);
        assert_eq!(config.worker_threads, 256);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("mapview.toml");

        let config = CacheConfig {
            storage_root: Some(PathBuf::from("/srv/world")),
            worker_threads: 3,
            initial_viewport: Some((1920, 1080)),
            ..CacheConfig::default()
        };
        config.save_to(&config_path).expect("Failed to save config");

        let loaded = CacheConfig::load_from(&config_path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.resolved_storage_root(), PathBuf::from("/srv/world"));
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = CacheConfig::load_from("/nonexistent/path/mapview.toml");
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "worker_threads = \"many\"").expect("write");

        assert!(matches!(CacheConfig::read(&path), Err(ConfigError::Parse(_))));
        assert_eq!(CacheConfig::load_from(&path), CacheConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("partial.toml");
        fs::write(&path, "worker_threads = 2\n").expect("write");

        let config = CacheConfig::load_from(&path);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
