//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ticketwave_delivery::{DeliverySettings, RetryPolicy};
use ticketwave_types::{UserId, DEFAULT_TICKET_EXTENSION};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Live ticket files. Empty = $data_dir/tickets/.
    #[serde(default)]
    pub tickets_dir: String,
    /// Cold-storage batches. Empty = $data_dir/archive/.
    #[serde(default)]
    pub archive_dir: String,
    /// Number of archive batches kept.
    #[serde(default = "default_archive_retention")]
    pub archive_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Accepted ticket file extension, without the dot.
    #[serde(default = "default_ticket_extension")]
    pub ticket_extension: String,
}

/// Delivery pacing and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    /// Wait between recipients.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_pacing_jitter_ms")]
    pub pacing_jitter_ms: u64,
    #[serde(default = "default_caption")]
    pub caption: String,
    /// Outbox root. Empty = $data_dir/outbox/.
    #[serde(default)]
    pub outbox_dir: String,
    /// Recipients the outbox refuses, as a blocked channel would.
    #[serde(default)]
    pub blocked: Vec<i64>,
    /// Wait between messages of an operator broadcast.
    #[serde(default = "default_broadcast_pacing_ms")]
    pub broadcast_pacing_ms: u64,
}

/// Operator access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Users granted operator rights at startup.
    #[serde(default)]
    pub bootstrap_admins: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Unix socket path. Empty = $data_dir/ticketwave.sock.
    #[serde(default)]
    pub socket_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub file: String,
}

// Default value functions

fn default_archive_retention() -> usize {
    ticketwave_storage::vault::DEFAULT_ARCHIVE_RETENTION
}

fn default_ticket_extension() -> String {
    DEFAULT_TICKET_EXTENSION.to_string()
}

fn default_max_attempts() -> u32 {
    RetryPolicy::DEFAULT.max_attempts
}

fn default_base_backoff_secs() -> u64 {
    RetryPolicy::DEFAULT.base_backoff.as_secs()
}

fn default_max_rate_limit_waits() -> u32 {
    RetryPolicy::DEFAULT.max_rate_limit_waits
}

fn default_pacing_ms() -> u64 {
    5_000
}

fn default_pacing_jitter_ms() -> u64 {
    500
}

fn default_broadcast_pacing_ms() -> u64 {
    40
}

fn default_caption() -> String {
    ticketwave_delivery::engine::DEFAULT_CAPTION.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            tickets_dir: String::new(),
            archive_dir: String::new(),
            archive_retention: default_archive_retention(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ticket_extension: default_ticket_extension(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            pacing_ms: default_pacing_ms(),
            pacing_jitter_ms: default_pacing_jitter_ms(),
            caption: default_caption(),
            outbox_dir: String::new(),
            blocked: Vec::new(),
            broadcast_pacing_ms: default_broadcast_pacing_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl DeliveryConfig {
    pub fn settings(&self) -> DeliverySettings {
        DeliverySettings {
            policy: RetryPolicy {
                max_attempts: self.max_attempts,
                base_backoff: Duration::from_secs(self.base_backoff_secs),
                max_rate_limit_waits: self.max_rate_limit_waits,
            },
            pacing: Duration::from_millis(self.pacing_ms),
            pacing_jitter: Duration::from_millis(self.pacing_jitter_ms),
            caption: self.caption.clone(),
            broadcast_pacing: Duration::from_millis(self.broadcast_pacing_ms),
        }
    }

    pub fn blocked_users(&self) -> Vec<UserId> {
        self.blocked.iter().copied().map(UserId).collect()
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn tickets_dir(&self) -> PathBuf {
        self.under_data_dir(&self.storage.tickets_dir, "tickets")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.under_data_dir(&self.storage.archive_dir, "archive")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.under_data_dir(&self.delivery.outbox_dir, "outbox")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.under_data_dir(&self.rpc.socket_path, "ticketwave.sock")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("ticketwave.db")
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> String {
        format!("ticketwave={}", self.logging.level)
    }

    fn under_data_dir(&self, configured: &str, default_name: &str) -> PathBuf {
        if configured.is_empty() {
            self.data_dir().join(default_name)
        } else {
            PathBuf::from(configured)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Default data directory; `TICKETWAVE_DATA_DIR` overrides.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TICKETWAVE_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".ticketwave"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/ticketwave"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.storage.archive_retention, 3);
        assert_eq!(config.ingest.ticket_extension, "pdf");
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.base_backoff_secs, 5);
        assert_eq!(config.delivery.pacing_ms, 5_000);
        assert_eq!(config.delivery.broadcast_pacing_ms, 40);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.log_directive(), "ticketwave=info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [storage]
            data_dir = "/srv/tickets"

            [delivery]
            pacing_ms = 250
            blocked = [42]
            "#,
        )
        .expect("parse");
        assert_eq!(config.tickets_dir(), PathBuf::from("/srv/tickets/tickets"));
        assert_eq!(config.socket_path(), PathBuf::from("/srv/tickets/ticketwave.sock"));
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.blocked_users(), vec![UserId(42)]);

        let settings = config.delivery.settings();
        assert_eq!(settings.pacing, Duration::from_millis(250));
        assert_eq!(settings.policy.base_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
    }
}
