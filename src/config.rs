use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            workers: WorkerConfig::default(),
            locks: LockConfig::default(),
            payment: PaymentConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Event pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Partitions per topic
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Maximum delivery attempts before a record moves to the dead-letter topic
    #[serde(default = "default_max_attempts")]
    pub max_delivery_attempts: u32,
    /// Fixed backoff between delivery attempts (milliseconds)
    #[serde(default = "default_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Polling interval when a partition has no new records (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            max_delivery_attempts: default_max_attempts(),
            retry_backoff_ms: default_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Background worker pool configuration.
///
/// Two separately sized pools: a small user-facing one (notification
/// creation) and a larger best-effort one (activity logging, analytics),
/// so a burst of low-priority work cannot starve user-facing latency.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_general_workers")]
    pub general_workers: usize,
    #[serde(default = "default_general_queue")]
    pub general_queue_capacity: usize,
    #[serde(default = "default_analytics_workers")]
    pub analytics_workers: usize,
    #[serde(default = "default_analytics_queue")]
    pub analytics_queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            general_workers: default_general_workers(),
            general_queue_capacity: default_general_queue(),
            analytics_workers: default_analytics_workers(),
            analytics_queue_capacity: default_analytics_queue(),
        }
    }
}

/// Distributed lock configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// How long an acquirer waits for a contended lock (milliseconds)
    #[serde(default = "default_lock_wait_ms")]
    pub wait_timeout_ms: u64,
    /// Lease duration; a crashed holder stops blocking others after this (milliseconds)
    #[serde(default = "default_lock_lease_ms")]
    pub lease_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_lock_wait_ms(),
            lease_timeout_ms: default_lock_lease_ms(),
        }
    }
}

/// Mock payment gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Probability that the mock gateway approves a payment (0.0 - 1.0)
    #[serde(default = "default_success_rate")]
    pub success_rate: Decimal,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
        }
    }
}

/// Database configuration (Postgres-backed store)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_partitions() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_general_workers() -> usize {
    2
}

fn default_general_queue() -> usize {
    100
}

fn default_analytics_workers() -> usize {
    4
}

fn default_analytics_queue() -> usize {
    500
}

fn default_lock_wait_ms() -> u64 {
    5_000
}

fn default_lock_lease_ms() -> u64 {
    30_000
}

fn default_success_rate() -> Decimal {
    Decimal::new(90, 2) // 0.90
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory.
    ///
    /// Precedence (lowest to highest): built-in defaults, `default.toml`,
    /// `local.toml`, `MYSHOP_*` environment variables.
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("pipeline.partitions", 3)?
            .set_default("pipeline.max_delivery_attempts", 3)?
            .set_default("pipeline.retry_backoff_ms", 1000)?
            .set_default("pipeline.poll_interval_ms", 50)?
            .set_default("workers.general_workers", 2)?
            .set_default("workers.general_queue_capacity", 100)?
            .set_default("workers.analytics_workers", 4)?
            .set_default("workers.analytics_queue_capacity", 500)?
            .set_default("locks.wait_timeout_ms", 5_000)?
            .set_default("locks.lease_timeout_ms", 30_000)?
            .set_default("payment.success_rate", "0.90")?
            .set_default("database.max_connections", 5)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(Environment::with_prefix("MYSHOP").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }
}
