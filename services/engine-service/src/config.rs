//! Service configuration management
//!
//! Loaded from a TOML file, then overridden by `MATCHING_*` environment
//! variables, then validated.

use anyhow::{bail, Context, Result};
use matching_engine::EngineConfig;
use persistence::{JournalConfig, SnapshotConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use types::ids::ProductId;
use types::product::Product;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: ServiceSettings,

    /// One engine is started per product
    pub products: Vec<Product>,

    /// Pipeline tuning shared by every product
    pub engine: EngineConfig,

    pub journal: JournalSettings,

    pub snapshot: SnapshotSettings,

    pub logging: LoggingConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Root of the `orders/`, `logs/` and `snapshots/` trees
    pub data_dir: PathBuf,

    /// Time allowed for the engines to drain after a shutdown signal
    pub shutdown_timeout_secs: u64,
}

/// Journal file settings for the order and log journals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSettings {
    pub max_file_size_mb: u64,

    /// 0 is unlimited
    pub max_total_size_mb: u64,

    pub fsync: bool,

    /// How often a caught-up order reader polls for new entries
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub compress: bool,

    /// Snapshot files kept per product
    pub keep: usize,

    /// Snapshots older than this are not restored from
    pub max_age_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 64,
            max_total_size_mb: 0,
            fsync: true,
            poll_interval_ms: 10,
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            compress: true,
            keep: 3,
            max_age_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn orders_dir(&self, product: &ProductId) -> PathBuf {
        self.service.data_dir.join("orders").join(product.as_str())
    }

    pub fn logs_dir(&self, product: &ProductId) -> PathBuf {
        self.service.data_dir.join("logs").join(product.as_str())
    }

    pub fn journal_config(&self, dir: PathBuf) -> JournalConfig {
        JournalConfig {
            max_file_size: self.journal.max_file_size_mb * 1024 * 1024,
            max_total_size: self.journal.max_total_size_mb * 1024 * 1024,
            fsync: self.journal.fsync,
            ..JournalConfig::new(dir)
        }
    }

    /// Snapshot store settings; each product gets its own subdirectory.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            compress: self.snapshot.compress,
            keep: self.snapshot.keep,
            max_age: self.snapshot.max_age_secs.map(Duration::from_secs),
            ..SnapshotConfig::new(self.service.data_dir.join("snapshots"))
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.journal.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_secs)
    }
}

/// Load configuration from an optional file and environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => ServiceConfig::default(),
    };

    load_from_env(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> Result<ServiceConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub fn parse_config(raw: &str) -> Result<ServiceConfig> {
    Ok(toml::from_str(raw)?)
}

/// Apply `MATCHING_*` overrides. `lookup` is `std::env::var` outside tests.
fn load_from_env<F>(config: &mut ServiceConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("MATCHING_LOG_LEVEL") {
        config.logging.level = level;
    }

    if let Some(format) = lookup("MATCHING_LOG_FORMAT") {
        config.logging.format = format;
    }

    if let Some(data_dir) = lookup("MATCHING_DATA_DIR") {
        config.service.data_dir = PathBuf::from(data_dir);
    }

    if let Some(threshold) = lookup("MATCHING_SNAPSHOT_THRESHOLD") {
        config.engine.snapshot_threshold = threshold
            .parse()
            .with_context(|| format!("MATCHING_SNAPSHOT_THRESHOLD is not a number: {}", threshold))?;
    }

    if let Some(interval) = lookup("MATCHING_SNAPSHOT_INTERVAL_MS") {
        config.engine.snapshot_interval_ms = interval
            .parse()
            .with_context(|| format!("MATCHING_SNAPSHOT_INTERVAL_MS is not a number: {}", interval))?;
    }

    if let Some(fsync) = lookup("MATCHING_JOURNAL_FSYNC") {
        config.journal.fsync = fsync
            .parse()
            .with_context(|| format!("MATCHING_JOURNAL_FSYNC is not a boolean: {}", fsync))?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    if config.products.is_empty() {
        bail!("At least one product must be configured");
    }

    let mut seen = std::collections::HashSet::new();
    for product in &config.products {
        // Deserialization skips ProductId's own checks; ids become directory names.
        if ProductId::try_new(product.id.as_str()).is_none() || product.id.split().is_none() {
            bail!("Product id must look like BASE-QUOTE: {}", product.id);
        }
        if !seen.insert(product.id.as_str()) {
            bail!("Product configured twice: {}", product.id);
        }
    }

    config
        .engine
        .validate()
        .map_err(|reason| anyhow::anyhow!("Invalid engine configuration: {}", reason))?;

    if config.journal.max_file_size_mb == 0 {
        bail!("journal.max_file_size_mb must be greater than 0");
    }

    if config.snapshot.keep == 0 {
        bail!("snapshot.keep must be at least 1");
    }

    match config.logging.format.as_str() {
        "json" | "pretty" | "compact" => {}
        other => bail!("Unknown log format: {}", other),
    }

    Ok(())
}
