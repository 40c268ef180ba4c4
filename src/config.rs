//! Engine configuration.
//!
//! Tuning knobs for the cache, debounce, and refresh behavior, loadable from
//! `comanda-sync.toml` with `COMANDA_SYNC_*` environment overrides.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::error::SyncError;

// Default values for engine configuration
const DEFAULT_TTL_MS: u64 = 45_000;
const DEFAULT_MAX_CACHE_ENTRIES: usize = 50;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_DEBOUNCE_SEARCH_MS: u64 = 300;
const DEFAULT_DEBOUNCE_FILTERS_MS: u64 = 500;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;
const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_PREFIX: &str = "COMANDA_SYNC";

/// Synchronization engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Time-to-live for cached pages, in milliseconds.
    pub ttl_ms: u64,
    /// Maximum cached pages per store before LRU eviction.
    pub max_cache_entries: usize,
    /// Items requested per page.
    pub page_size: u32,
    /// Debounce delay for free-text search edits, in milliseconds.
    pub debounce_search_ms: u64,
    /// Debounce delay for structured filter edits, in milliseconds.
    pub debounce_filters_ms: u64,
    /// Periodic refresh cadence while the view is visible, in milliseconds.
    pub refresh_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            page_size: DEFAULT_PAGE_SIZE,
            debounce_search_ms: DEFAULT_DEBOUNCE_SEARCH_MS,
            debounce_filters_ms: DEFAULT_DEBOUNCE_FILTERS_MS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl SyncConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn debounce_search(&self) -> Duration {
        Duration::from_millis(self.debounce_search_ms)
    }

    pub fn debounce_filters(&self) -> Duration {
        Duration::from_millis(self.debounce_filters_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Returns the cache bound as NonZeroUsize, clamping to 1 if zero.
    pub fn max_cache_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_cache_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the page size, clamping to 1 if zero.
    pub fn page_size_non_zero(&self) -> u32 {
        self.page_size.max(1)
    }
}

/// Log output format for host binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Compact,
}

/// Logging settings for [`crate::telemetry::init`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level directive, e.g. `info` or `comanda_sync=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingSettings {
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }
}

/// Top-level settings for a panel host embedding the engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub sync: SyncConfig,
    pub logging: LoggingSettings,
}

impl PanelSettings {
    /// Load settings with layered precedence: file (optional) then environment.
    ///
    /// Environment overrides use the `COMANDA_SYNC` prefix with `__` as the
    /// section separator, e.g. `COMANDA_SYNC__SYNC__TTL_MS=60000`.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
