//! Configuration for page-batch.
//!
//! This module provides process-wide runtime defaults. Use [`ConfigBuilder`]
//! at application startup to override them; every component falls back to
//! [`Config::default`] when nothing was installed.

use std::sync::OnceLock;

use crate::image::CacheLimits;

/// Global configuration, initialized via [`ConfigBuilder::init`].
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Environment variable that overrides parallel-safety detection.
pub const SAFE_FORK_ENV: &str = "PAGE_BATCH_SAFE_FORK";

/// Hard ceiling on worker count regardless of CPU count.
pub const MAX_WORKERS_CEILING: usize = 8;

/// Default rasterization resolution for region crops.
pub const DEFAULT_DPI: u32 = 150;

/// Runtime configuration for page-batch.
#[derive(Debug, Clone)]
pub struct Config {
    /// DPI used when a region is cropped from its page raster.
    pub default_dpi: u32,
    /// Tier capacities for newly created image caches.
    pub cache_limits: CacheLimits,
    /// Upper bound for `max_workers` in detected capabilities.
    pub max_workers_ceiling: usize,
    /// Environment variable consulted by [`EnvOverrides::from_env`].
    pub safe_fork_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_dpi: DEFAULT_DPI,
            cache_limits: CacheLimits::default(),
            max_workers_ceiling: MAX_WORKERS_CEILING,
            safe_fork_env: SAFE_FORK_ENV.to_string(),
        }
    }
}

/// Configuration builder for fluent API.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    default_dpi: Option<u32>,
    cache_limits: Option<CacheLimits>,
    max_workers_ceiling: Option<usize>,
    safe_fork_env: Option<String>,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the DPI used for region crops.
    ///
    /// Default: 150
    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.default_dpi = Some(dpi);
        self
    }

    /// Set the tier capacities for image caches.
    pub fn cache_limits(mut self, limits: CacheLimits) -> Self {
        self.cache_limits = Some(limits);
        self
    }

    /// Set the hard ceiling on worker count.
    ///
    /// Default: 8
    pub fn max_workers_ceiling(mut self, ceiling: usize) -> Self {
        self.max_workers_ceiling = Some(ceiling);
        self
    }

    /// Set the environment variable name for the parallel-safety override.
    ///
    /// # Example
    ///
    /// ```
    /// use page_batch::config::ConfigBuilder;
    ///
    /// ConfigBuilder::new()
    ///     .safe_fork_env("MYAPP_SAFE_FORK")
    ///     .init();
    /// ```
    pub fn safe_fork_env(mut self, name: impl Into<String>) -> Self {
        self.safe_fork_env = Some(name.into());
        self
    }

    /// Assemble the configuration without installing it.
    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            default_dpi: self.default_dpi.unwrap_or(defaults.default_dpi),
            cache_limits: self.cache_limits.unwrap_or(defaults.cache_limits),
            max_workers_ceiling: self
                .max_workers_ceiling
                .unwrap_or(defaults.max_workers_ceiling),
            safe_fork_env: self.safe_fork_env.unwrap_or(defaults.safe_fork_env),
        }
    }

    /// Build and install the global configuration.
    ///
    /// This can only be called once. Subsequent calls are ignored.
    /// Returns `true` if configuration was set, `false` if already initialized.
    pub fn init(self) -> bool {
        CONFIG.set(self.build()).is_ok()
    }
}

/// Get the current configuration, or default if not initialized.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

// =============================================================================
// Environment Overrides
// =============================================================================

/// Environment-derived overrides for capability detection.
///
/// Captured once and passed explicitly so that detection does not read the
/// process environment behind the caller's back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Asserted parallel safety, when the override variable is set.
    pub safe_fork: Option<bool>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        let name = &get().safe_fork_env;
        Self {
            safe_fork: std::env::var(name).ok().and_then(|v| parse_bool(&v)),
        }
    }

    /// Overrides asserting the given parallel safety.
    pub fn safe_fork(value: bool) -> Self {
        Self {
            safe_fork: Some(value),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
