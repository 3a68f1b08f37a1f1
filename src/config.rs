//! TOML configuration for riskmap.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) is a valid configuration. The file path can be overridden with the
//! `RISKMAP_CONFIG` environment variable.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::timeseries::CollectorSettings;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskmapConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RiskmapConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded riskmap configuration");
        Ok(config)
    }

    /// Try, in order: `RISKMAP_CONFIG`, `/etc/riskmap/riskmap.toml`, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("RISKMAP_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RISKMAP_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/riskmap/riskmap.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values that would make the builders loop forever or never run.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.poll_interval_minutes <= 0 {
            bail!(
                "analysis.poll_interval_minutes must be positive, got {}",
                self.analysis.poll_interval_minutes
            );
        }
        if self.collector.window_minutes <= 0 {
            bail!(
                "collector.window_minutes must be positive, got {}",
                self.collector.window_minutes
            );
        }
        if self.collector.max_concurrent_fetches == 0 {
            bail!("collector.max_concurrent_fetches must be at least 1");
        }
        if self.collector.max_history_days <= 0 {
            bail!(
                "collector.max_history_days must be positive, got {}",
                self.collector.max_history_days
            );
        }
        if self.analysis.default_tag.is_empty() {
            bail!("analysis.default_tag must not be empty");
        }
        Ok(())
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            window_minutes: self.collector.window_minutes,
            max_concurrent_fetches: self.collector.max_concurrent_fetches,
            heartbeat_name: self.analysis.heartbeat_name.clone(),
            default_tag: self.analysis.default_tag.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Raw polling interval of the analysis job, in minutes.
    pub poll_interval_minutes: i64,
    /// Transaction name of the collector liveness signal.
    pub heartbeat_name: String,
    /// Tag given to samples collected without one.
    pub default_tag: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 15,
            heartbeat_name: "Heartbeat".to_string(),
            default_tag: crate::DEFAULT_TAG.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub window_minutes: i64,
    pub max_concurrent_fetches: usize,
    /// Longest history span served before falling back.
    pub max_history_days: i64,
    /// History kept before `start` once the requested span is too long.
    pub history_fallback_minutes: i64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            max_concurrent_fetches: 8,
            max_history_days: 30,
            history_fallback_minutes: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/riskmap.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
