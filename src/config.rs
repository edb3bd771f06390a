//! Configuration for cacheprog
//!
//! Centralized configuration with sensible defaults.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a cache helper instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the disk store
    /// Internal structure:
    ///   {cache_dir}/
    ///     ├── action/<xx>/<action-id>   (object id + size)
    ///     └── object/<xx>/<object-id>   (raw object bytes)
    pub cache_dir: PathBuf,

    /// Age after which action records expire at session close.
    /// `None` disables pruning and the store does not advertise `close`.
    pub max_age: Option<Duration>,

    // -------------------------------------------------------------------------
    // Session Configuration
    // -------------------------------------------------------------------------
    /// Max requests serviced concurrently (0 = number of logical CPUs)
    pub max_requests: usize,

    /// Emit begin/end debug lines for every request
    pub log_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cacheprog_data"),
            max_age: None,
            max_requests: 0,
            log_requests: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Effective worker ceiling, resolving 0 to the host's logical CPU count
    pub fn effective_max_requests(&self) -> usize {
        if self.max_requests > 0 {
            return self.max_requests;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the cache directory (root of the disk store)
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = path.into();
        self
    }

    /// Set the expiry age for action records; zero disables pruning
    pub fn max_age(mut self, age: Duration) -> Self {
        self.config.max_age = (!age.is_zero()).then_some(age);
        self
    }

    /// Set the maximum number of concurrently serviced requests
    pub fn max_requests(mut self, count: usize) -> Self {
        self.config.max_requests = count;
        self
    }

    /// Enable or disable per-request debug logging
    pub fn log_requests(mut self, enabled: bool) -> Self {
        self.config.log_requests = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
