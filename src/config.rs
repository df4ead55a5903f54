//! Application configuration
//!
//! Loaded from a TOML file when one exists, otherwise every section falls
//! back to its defaults. Unknown keys are rejected so typos surface
//! immediately instead of silently running with defaults.

use crate::proxy::ValidatorConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default pipeline interval in seconds (hourly)
const DEFAULT_INTERVAL_SECS: u64 = 3600;

/// Default number of validation attempts per cycle
const DEFAULT_VALIDATE_ATTEMPTS: u32 = 3;

/// Default initial backoff between validation attempts in seconds
const DEFAULT_BACKOFF_INITIAL_SECS: u64 = 60;

/// Default backoff cap in seconds
const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Default freshness window for source messages in hours
const DEFAULT_FRESHNESS_HOURS: i64 = 24;

/// Default JSON snapshot path
const DEFAULT_JSON_PATH: &str = "data/proxies.json";

/// Default SQLite database path
const DEFAULT_SQLITE_PATH: &str = "data/proxies.db";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Source channels to scan for proxy announcements
    pub channels: Vec<String>,

    /// Cycle scheduling and retry policy
    pub scheduler: SchedulerConfig,

    /// Probe timing and batching
    pub validator: ValidationConfig,

    /// Message source behavior
    pub source: SourceConfig,

    /// Persistence backend
    pub storage: StorageConfig,

    /// Report publishing
    pub publish: PublishConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between cycle starts
    pub interval_secs: u64,

    /// Validation attempts per cycle before the cycle is declared failed
    pub validate_attempts: u32,

    /// Initial delay between validation attempts in seconds
    pub backoff_initial_secs: u64,

    /// Upper bound for the doubling backoff in seconds
    pub backoff_max_secs: u64,

    /// Optional hard deadline for a whole cycle in seconds
    pub cycle_deadline_secs: Option<u64>,
}

/// Validator configuration in file-friendly units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Timeout for each network probe in seconds
    pub timeout_secs: u64,

    /// Ping samples averaged per candidate
    pub ping_count: u32,

    /// Delay between ping samples in milliseconds
    pub ping_delay_ms: u64,

    /// Candidates probed concurrently in one batch
    pub batch_size: usize,

    /// Pause between batches in seconds
    pub batch_delay_secs: u64,

    /// Retries for transient errors and unproductive throughput probes
    pub retry_count: u32,

    /// Delay between transient-error retries in milliseconds
    pub retry_delay_ms: u64,

    /// Whether to run download/upload probes
    pub measure_throughput: bool,
}

/// Message source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Messages older than this many hours are dropped by the source
    pub freshness_hours: i64,
}

/// Persistence backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    None,
    Json,
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Snapshot or database path; defaults depend on the backend
    pub path: Option<PathBuf>,
}

/// Publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Report file destination; stdout when unset
    pub report_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            scheduler: SchedulerConfig::default(),
            validator: ValidationConfig::default(),
            source: SourceConfig::default(),
            storage: StorageConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            validate_attempts: DEFAULT_VALIDATE_ATTEMPTS,
            backoff_initial_secs: DEFAULT_BACKOFF_INITIAL_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            cycle_deadline_secs: None,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let defaults = ValidatorConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            ping_count: defaults.ping_count,
            ping_delay_ms: defaults.ping_delay.as_millis() as u64,
            batch_size: defaults.batch_size,
            batch_delay_secs: defaults.batch_delay.as_secs(),
            retry_count: defaults.retry_count,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            measure_throughput: defaults.measure_throughput,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            freshness_hours: DEFAULT_FRESHNESS_HOURS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::None,
            path: None,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { report_path: None }
    }
}

impl AppConfig {
    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_secs == 0 {
            bail!("scheduler.interval_secs must be greater than 0");
        }
        if self.scheduler.validate_attempts == 0 {
            bail!("scheduler.validate_attempts must be greater than 0");
        }
        if self.scheduler.backoff_max_secs < self.scheduler.backoff_initial_secs {
            bail!("scheduler.backoff_max_secs must be at least backoff_initial_secs");
        }
        if self.validator.batch_size == 0 {
            bail!("validator.batch_size must be greater than 0");
        }
        if self.validator.ping_count == 0 {
            bail!("validator.ping_count must be greater than 0");
        }
        if self.source.freshness_hours <= 0 {
            bail!("source.freshness_hours must be greater than 0");
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn cycle_deadline(&self) -> Option<Duration> {
        self.cycle_deadline_secs.map(Duration::from_secs)
    }
}

impl ValidationConfig {
    /// Convert to the validator's runtime configuration
    pub fn to_validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::new()
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_ping_count(self.ping_count)
            .with_ping_delay(Duration::from_millis(self.ping_delay_ms))
            .with_batch_size(self.batch_size)
            .with_batch_delay(Duration::from_secs(self.batch_delay_secs))
            .with_retry_count(self.retry_count)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_measure_throughput(self.measure_throughput)
    }
}

impl StorageConfig {
    /// Resolve the effective storage path for the selected backend
    pub fn effective_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => match self.backend {
                StorageBackend::Sqlite => PathBuf::from(DEFAULT_SQLITE_PATH),
                _ => PathBuf::from(DEFAULT_JSON_PATH),
            },
        }
    }
}
