//! Configuration file parser for `stormfeed.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos. `KAFKA_BROKERS` and `RAW_TOPIC` override the file.
use crate::delivery::{KafkaSettings, RetryPolicy, MAX_MESSAGE_BYTES};
use crate::feed::{parse_base_url, FeedLimits, DEFAULT_MAX_FEED_BYTES};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default storm report directory.
pub const DEFAULT_BASE_URL: &str = "https://www.spc.noaa.gov/climo/reports/";
pub const DEFAULT_TOPIC: &str = "raw-weather-reports";

/// Longest accepted schedule interval (one leap year).
pub const MAX_INTERVAL_MINUTES: u64 = 366 * 24 * 60;

/// Comma-separated broker list override.
pub const ENV_BROKERS: &str = "KAFKA_BROKERS";
/// Topic override.
pub const ENV_TOPIC: &str = "RAW_TOPIC";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed fine but a value is unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// Every section and field uses `#[serde(default)]` so any subset of keys can
/// be specified.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub broker: BrokerConfig,
    pub delivery: DeliveryConfig,
    pub schedule: ScheduleConfig,
}

/// `[feed]`: where storm reports are downloaded from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Per-feed response ceiling in bytes.
    pub max_bytes: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_bytes: DEFAULT_MAX_FEED_BYTES,
        }
    }
}

/// `[broker]`: Kafka connection properties.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub request_timeout_ms: u64,
    /// Client-level retries for connection and produce requests.
    pub connect_retries: u32,
    pub connect_retry_initial_ms: u64,
    pub max_in_flight: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["kafka:9092".to_string()],
            topic: DEFAULT_TOPIC.to_string(),
            request_timeout_ms: 30_000,
            connect_retries: 10,
            connect_retry_initial_ms: 300,
            max_in_flight: 5,
        }
    }
}

/// `[delivery]`: batch retry policy and message size limit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_message_bytes: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 1000,
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }
}

/// `[schedule]`: how often `serve` runs the pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_minutes: u64,
    /// How long shutdown waits for the broker connection to close.
    pub shutdown_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 24 * 60,
            shutdown_grace_secs: 5,
        }
    }
}

const KNOWN_KEYS: &[(&str, &[&str])] = &[
    ("feed", &["base_url", "timeout_secs", "max_bytes"]),
    (
        "broker",
        &[
            "brokers",
            "topic",
            "request_timeout_ms",
            "connect_retries",
            "connect_retry_initial_ms",
            "max_in_flight",
        ],
    ),
    (
        "delivery",
        &["max_attempts", "backoff_base_ms", "max_message_bytes"],
    ),
    ("schedule", &["interval_minutes", "shutdown_grace_secs"]),
];

fn warn_unknown_keys(raw: &toml::Table) {
    for (section, value) in raw {
        let Some((_, fields)) = KNOWN_KEYS.iter().find(|(name, _)| name == section) else {
            tracing::warn!(key = %section, "Unknown section in config file, ignoring");
            continue;
        };
        if let Some(table) = value.as_table() {
            for key in table.keys() {
                if !fields.contains(&key.as_str()) {
                    tracing::warn!(
                        section = %section,
                        key = %key,
                        "Unknown key in config file, ignoring"
                    );
                }
            }
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load, apply environment overrides from the process, then validate.
    pub fn resolve(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?.with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            topic = %config.broker.topic,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Applies environment overrides. Blank values are ignored.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BROKERS) {
            let brokers: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
            if !brokers.is_empty() {
                tracing::debug!(brokers = ?brokers, "Broker list overridden from environment");
                self.broker.brokers = brokers;
            }
        }
        if let Some(topic) = lookup(ENV_TOPIC) {
            let topic = topic.trim();
            if !topic.is_empty() {
                tracing::debug!(topic = %topic, "Topic overridden from environment");
                self.broker.topic = topic.to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid("broker.brokers must not be empty".into()));
        }
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.topic must not be empty".into()));
        }
        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::Invalid("delivery.max_attempts must be at least 1".into()));
        }
        if self.schedule.interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_minutes must be at least 1".into(),
            ));
        }
        if self.schedule.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "schedule.interval_minutes must be at most {MAX_INTERVAL_MINUTES}"
            )));
        }
        self.base_url()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.feed.base_url)
            .map_err(|e| ConfigError::Invalid(format!("feed.base_url: {e}")))
    }

    pub fn feed_limits(&self) -> FeedLimits {
        FeedLimits {
            timeout: Duration::from_secs(self.feed.timeout_secs),
            max_bytes: self.feed.max_bytes,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.delivery.max_attempts,
            base_delay: Duration::from_millis(self.delivery.backoff_base_ms),
        }
    }

    pub fn kafka_settings(&self) -> KafkaSettings {
        KafkaSettings {
            brokers: self.broker.brokers.clone(),
            request_timeout: Duration::from_millis(self.broker.request_timeout_ms),
            retries: self.broker.connect_retries,
            retry_initial: Duration::from_millis(self.broker.connect_retry_initial_ms),
            max_in_flight: self.broker.max_in_flight,
            max_message_bytes: self.delivery.max_message_bytes,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_minutes.saturating_mul(60))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.schedule.shutdown_grace_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
