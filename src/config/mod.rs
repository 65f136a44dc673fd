//! Configuration management for band-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::{Constraints, SyncTask, DEFAULT_TASK_NAME};
use crate::sync::retry::{BackoffKind, BackoffPolicy};
use crate::sync::scheduler::SchedulerConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Periodic sync task and scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Sync provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Connectivity probe configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// HTTP control server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix BAND_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Scheduler
        if let Ok(enabled) = std::env::var("BAND_SYNC_AUTO_SYNC") {
            config.scheduler.auto_sync = enabled.parse().unwrap_or(true);
        }
        if let Ok(secs) = std::env::var("BAND_SYNC_INTERVAL_SECS") {
            config.scheduler.interval_secs = parse_env("BAND_SYNC_INTERVAL_SECS", &secs)?;
        }
        if let Ok(attempts) = std::env::var("BAND_SYNC_MAX_ATTEMPTS") {
            config.scheduler.max_attempts_per_cycle =
                parse_env("BAND_SYNC_MAX_ATTEMPTS", &attempts)?;
        }

        // Provider
        if let Ok(url) = std::env::var("BAND_SYNC_PROVIDER_URL") {
            config.provider.base_url = url;
        }
        if let Ok(key) = std::env::var("BAND_SYNC_PROVIDER_API_KEY") {
            config.provider.api_key = Some(key);
        }
        if let Ok(device) = std::env::var("BAND_SYNC_DEVICE_ID") {
            config.provider.device_id = device;
        }

        // Network
        if let Ok(addr) = std::env::var("BAND_SYNC_PROBE_ADDR") {
            config.network.probe_addr = Some(addr);
        }

        // Server
        if let Ok(host) = std::env::var("BAND_SYNC_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("BAND_SYNC_SERVER_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid port number".to_string()))?;
        }

        // Database
        if let Ok(path) = std::env::var("BAND_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        // OTEL
        if let Ok(enabled) = std::env::var("BAND_SYNC_OTEL_ENABLED") {
            config.otel.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = std::env::var("BAND_SYNC_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        // Logging
        if let Ok(level) = std::env::var("BAND_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("BAND_SYNC_LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.task_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "scheduler.task_name must not be empty".to_string(),
            ));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.min_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.min_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.max_attempts_per_cycle == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.max_attempts_per_cycle must be at least 1".to_string(),
            ));
        }
        if self.database.run_retention == 0 {
            return Err(ConfigError::InvalidValue(
                "database.run_retention must be at least 1".to_string(),
            ));
        }
        if self.provider.base_url.is_empty() {
            return Err(ConfigError::MissingRequired("provider.base_url".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value)))
}

/// Periodic sync task and scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Schedule the task when the daemon starts
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Unique name of the periodic task
    #[serde(default = "default_task_name")]
    pub task_name: String,

    /// Period between firings in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Shortest accepted period; shorter requests are raised to it
    #[serde(default = "default_interval_secs")]
    pub min_interval_secs: u64,

    /// Failed attempts tolerated per firing
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_cycle: u32,

    /// Require network connectivity before each attempt
    #[serde(default = "default_requires_network")]
    pub requires_network: bool,

    /// Treat every provider error as retryable
    #[serde(default = "default_retry_all")]
    pub retry_all_provider_errors: bool,

    /// Delay before the first periodic firing in seconds
    #[serde(default)]
    pub initial_delay_secs: u64,

    /// Random jitter added before each firing in seconds
    #[serde(default)]
    pub jitter_secs: u64,

    /// Upper bound for a single provider attempt in seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Backoff between failed attempts
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            auto_sync: default_auto_sync(),
            task_name: default_task_name(),
            interval_secs: default_interval_secs(),
            min_interval_secs: default_interval_secs(),
            max_attempts_per_cycle: default_max_attempts(),
            requires_network: default_requires_network(),
            retry_all_provider_errors: default_retry_all(),
            initial_delay_secs: 0,
            jitter_secs: 0,
            attempt_timeout_secs: default_attempt_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerSettings {
    /// Task definition described by these settings
    pub fn task(&self) -> SyncTask {
        let constraints = if self.requires_network {
            Constraints::network_connected()
        } else {
            Constraints::none()
        };

        SyncTask::new(self.task_name.clone())
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_constraints(constraints)
            .with_backoff(self.backoff.policy())
            .with_max_attempts(self.max_attempts_per_cycle)
    }

    /// Runtime settings for the scheduler
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            min_interval: Duration::from_secs(self.min_interval_secs),
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            jitter: Duration::from_secs(self.jitter_secs),
        }
    }

    /// Upper bound for a single provider attempt
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }
}

fn default_auto_sync() -> bool {
    true
}

fn default_task_name() -> String {
    DEFAULT_TASK_NAME.to_string()
}

fn default_interval_secs() -> u64 {
    900
}

fn default_max_attempts() -> u32 {
    3
}

fn default_requires_network() -> bool {
    true
}

fn default_retry_all() -> bool {
    true
}

fn default_attempt_timeout() -> u64 {
    300
}

/// Backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// Growth of the delay between attempts
    #[serde(default)]
    pub kind: BackoffKind,

    /// Delay after the first failed attempt in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Optional cap on a single delay in seconds
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::default(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: None,
        }
    }
}

impl BackoffConfig {
    /// Backoff policy described by this configuration
    pub fn policy(&self) -> BackoffPolicy {
        let base = Duration::from_secs(self.base_delay_secs);
        let policy = match self.kind {
            BackoffKind::Exponential => BackoffPolicy::exponential(base),
            BackoffKind::Linear => BackoffPolicy::linear(base),
        };
        match self.max_delay_secs {
            Some(max) => policy.with_max_delay(Duration::from_secs(max)),
            None => policy,
        }
    }
}

fn default_base_delay() -> u64 {
    10
}

/// Sync provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the sync server
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Bearer token; the provider is not ready without one
    pub api_key: Option<String>,

    /// Identifier of the paired band
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Wait reported for HTTP 429 responses without Retry-After
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            device_id: default_device_id(),
            timeout_secs: default_request_timeout(),
            rate_limit_wait_secs: default_rate_limit_wait(),
        }
    }
}

fn default_provider_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_device_id() -> String {
    "default".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_rate_limit_wait() -> u64 {
    60
}

/// Connectivity probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// `host:port` to connect to; defaults to the provider's address
    pub probe_addr: Option<String>,

    /// Probe timeout in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_addr: None,
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    3000
}

/// HTTP control server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Run records kept per task; older ones are pruned on insert
    #[serde(default = "default_run_retention")]
    pub run_retention: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            run_retention: default_run_retention(),
        }
    }
}

fn default_database_path() -> String {
    "/data/db/band-sync.db".to_string()
}

fn default_run_retention() -> u32 {
    1000
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Whether to use insecure connection
    #[serde(default)]
    pub insecure: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            insecure: false,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "band-sync".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand `${VAR_NAME}` references; unknown variables are left as written
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
