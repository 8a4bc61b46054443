//! Server configuration file.
//!
//! Loaded from TOML. Every section and field is optional; anything left out
//! takes its default. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [server]
//! listen_addr = "0.0.0.0:8080"
//!
//! [log]
//! partitions = 8
//! retention_max_age_secs = 86400
//!
//! [consumer]
//! group = "audit"
//! max_retries = 5
//!
//! [checkpoint]
//! path = "/var/lib/relay/checkpoints.json"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::{ConsumerGroup, Limits, RetryPolicy};
use relay_dispatch::{DispatcherConfig, ExpiredPolicy, StartPosition};
use relay_partition::{
    LogStoreConfig, ProducerConfig, RetentionPolicy, SegmentConfig, TokenBucketConfig,
};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// HTTP listener.
    pub server: ServerSection,
    /// Log store.
    pub log: LogSection,
    /// Producer retries.
    pub producer: ProducerSection,
    /// Consumer dispatcher.
    pub consumer: ConsumerSection,
    /// Checkpoint storage.
    pub checkpoint: CheckpointSection,
    /// Dead-letter storage.
    pub dead_letter: DeadLetterSection,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Address the ingest API binds to.
    pub listen_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
        }
    }
}

/// Log store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Number of partitions.
    pub partitions: u32,
    /// Records per segment before it rolls.
    pub segment_max_records: u64,
    /// Bytes per segment before it rolls.
    pub segment_max_bytes: u64,
    /// Age of the active segment before it rolls.
    pub segment_max_age_secs: u64,
    /// Records older than this are purged. Unset keeps records forever.
    pub retention_max_age_secs: Option<u64>,
    /// Per-partition size cap. Unset disables size retention.
    pub retention_max_bytes: Option<u64>,
    /// How often retention runs.
    pub retention_interval_secs: u64,
    /// Per-partition append throttle. Unset disables throttling.
    pub throttle: Option<TokenBucketConfig>,
}

impl Default for LogSection {
    fn default() -> Self {
        let segment = SegmentConfig::default();
        Self {
            partitions: 4,
            segment_max_records: segment.max_records,
            segment_max_bytes: segment.max_size_bytes,
            segment_max_age_secs: segment.max_age.as_secs(),
            retention_max_age_secs: Some(24 * 60 * 60),
            retention_max_bytes: None,
            retention_interval_secs: 60,
            throttle: None,
        }
    }
}

/// Producer retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerSection {
    /// Attempts per append, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on any backoff.
    pub max_backoff_ms: u64,
    /// Records per append call.
    pub max_batch_records: u32,
}

impl Default for ProducerSection {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            max_batch_records: 500,
        }
    }
}

/// Consumer dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerSection {
    /// Run the dispatcher in this process.
    pub enabled: bool,
    /// Consumer group name.
    pub group: String,
    /// Records per batch.
    pub batch_size: u32,
    /// Handler retries before dead-lettering.
    pub max_retries: u32,
    /// Handler deadline.
    pub handler_timeout_ms: u64,
    /// Wait between polls of an empty partition.
    pub poll_interval_ms: u64,
    /// Where a partition without a checkpoint starts.
    pub start_position: StartPosition,
    /// Reaction to a purged position.
    pub on_expired: ExpiredPolicy,
    /// Attempts for checkpoint commits and dead-letter writes.
    pub commit_attempts: u32,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            group: "default".to_string(),
            batch_size: 100,
            max_retries: 5,
            handler_timeout_ms: 30_000,
            poll_interval_ms: 250,
            start_position: StartPosition::Earliest,
            on_expired: ExpiredPolicy::Resync,
            commit_attempts: 5,
        }
    }
}

/// Checkpoint storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointSection {
    /// Checkpoint file. Unset keeps checkpoints in memory.
    pub path: Option<PathBuf>,
    /// Fsync the file on every change.
    pub fsync: bool,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            path: None,
            fsync: true,
        }
    }
}

/// Dead-letter storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeadLetterSection {
    /// JSON-lines file. Unset keeps dead letters in memory.
    pub path: Option<PathBuf>,
}

impl RelayConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse_str(&contents)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `Config` if the string is not valid configuration.
    pub fn parse_str(contents: &str) -> ServerResult<Self> {
        toml::from_str(contents).map_err(|e| ServerError::Config {
            message: format!("failed to parse config: {e}"),
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> ServerResult<()> {
        let log_store = self.log_store_config();
        log_store.validate()?;
        if self.log.retention_interval_secs == 0 {
            return Err(config_error("log.retention_interval_secs must be positive"));
        }
        if self.producer.max_attempts == 0 {
            return Err(config_error("producer.max_attempts must be positive"));
        }
        if self.producer.max_batch_records == 0 {
            return Err(config_error("producer.max_batch_records must be positive"));
        }
        if self.producer.max_batch_records > log_store.max_append_records() {
            return Err(ServerError::Config {
                message: format!(
                    "producer.max_batch_records {} exceeds the largest admissible append of {}",
                    self.producer.max_batch_records,
                    log_store.max_append_records()
                ),
            });
        }
        if self.consumer.enabled {
            self.dispatcher_config()?.validate(&Limits::default())?;
        }
        Ok(())
    }

    /// Builds the log store configuration.
    #[must_use]
    pub fn log_store_config(&self) -> LogStoreConfig {
        let log = &self.log;
        let segment = SegmentConfig::default()
            .with_max_records(log.segment_max_records)
            .with_max_size_bytes(log.segment_max_bytes)
            .with_max_age(Duration::from_secs(log.segment_max_age_secs));

        let mut retention = RetentionPolicy::unbounded();
        if let Some(secs) = log.retention_max_age_secs {
            retention = retention.with_max_age(Duration::from_secs(secs));
        }
        if let Some(bytes) = log.retention_max_bytes {
            retention = retention.with_max_bytes(bytes);
        }

        let mut config = LogStoreConfig::new(log.partitions)
            .with_segment(segment)
            .with_retention(retention);
        if let Some(throttle) = log.throttle {
            config = config.with_throttle(throttle);
        }
        config
    }

    /// Builds the producer configuration.
    #[must_use]
    pub fn producer_config(&self) -> ProducerConfig {
        let producer = &self.producer;
        let retry = RetryPolicy {
            initial_backoff: Duration::from_millis(producer.initial_backoff_ms),
            max_backoff: Duration::from_millis(producer.max_backoff_ms),
            ..RetryPolicy::with_max_attempts(producer.max_attempts)
        };
        ProducerConfig::default()
            .with_retry(retry)
            .with_max_batch_records(producer.max_batch_records)
    }

    /// Builds the dispatcher configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the group name is invalid.
    pub fn dispatcher_config(&self) -> ServerResult<DispatcherConfig> {
        let consumer = &self.consumer;
        let group = ConsumerGroup::new(consumer.group.clone())?;
        Ok(DispatcherConfig::new(group)
            .with_batch_size(consumer.batch_size)
            .with_max_retries(consumer.max_retries)
            .with_handler_timeout(Duration::from_millis(consumer.handler_timeout_ms))
            .with_poll_interval(Duration::from_millis(consumer.poll_interval_ms))
            .with_start_position(consumer.start_position)
            .with_on_expired(consumer.on_expired)
            .with_commit_attempts(consumer.commit_attempts))
    }

    /// How often retention runs.
    #[must_use]
    pub const fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.log.retention_interval_secs)
    }
}

fn config_error(message: &str) -> ServerError {
    ServerError::Config {
        message: message.to_string(),
    }
}
