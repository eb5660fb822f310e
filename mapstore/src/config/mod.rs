//! Storage configuration.

mod file;

pub use file::{config_file_path, default_data_dir, ConfigFileError};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::transport::DEFAULT_TIMEOUT_SECS;

/// File name of the persisted download queue inside the data directory.
pub const QUEUE_FILE_NAME: &str = "download_queue.json";

/// How many transfers may run at once.
///
/// This also decides how much free space an update needs; see
/// [`DiffManager::is_enough_space_for_update`](crate::diff::DiffManager::is_enough_space_for_update).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    #[default]
    OneAtATime,
    Unlimited,
}

impl ConcurrencyPolicy {
    /// True when another transfer may start with `active` already running.
    pub fn allows_another(self, active: usize) -> bool {
        match self {
            ConcurrencyPolicy::OneAtATime => active == 0,
            ConcurrencyPolicy::Unlimited => true,
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyPolicy::OneAtATime => f.write_str("one_at_a_time"),
            ConcurrencyPolicy::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl FromStr for ConcurrencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "one_at_a_time" | "one" | "sequential" => Ok(ConcurrencyPolicy::OneAtATime),
            "unlimited" | "parallel" => Ok(ConcurrencyPolicy::Unlimited),
            _ => Err("must be one of: one_at_a_time, unlimited".to_string()),
        }
    }
}

/// Configuration for [`Storage`](crate::storage::Storage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Root of the version directories.
    pub data_dir: PathBuf,

    /// Base URLs of map servers, tried in order.
    pub servers: Vec<String>,

    pub concurrency: ConcurrencyPolicy,

    /// Verify SHA-256 of downloaded maps when the catalog provides one.
    pub verify_checksums: bool,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Write the queue to disk after every change and restore it on start.
    pub persist_queue: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            servers: Vec::new(),
            concurrency: ConcurrencyPolicy::default(),
            verify_checksums: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            persist_queue: true,
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_server(mut self, url: impl Into<String>) -> Self {
        self.servers.push(url.into());
        self
    }

    pub fn with_concurrency(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency = policy;
        self
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_persist_queue(mut self, persist: bool) -> Self {
        self.persist_queue = persist;
        self
    }

    /// Path of the persisted download queue.
    pub fn queue_file(&self) -> PathBuf {
        self.data_dir.join(QUEUE_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert!(config.servers.is_empty());
        assert_eq!(config.concurrency, ConcurrencyPolicy::OneAtATime);
        assert!(config.verify_checksums);
        assert!(config.persist_queue);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_builder_pattern() {
        let config = StorageConfig::new("/maps")
            .with_server("https://a.example")
            .with_server("https://b.example")
            .with_concurrency(ConcurrencyPolicy::Unlimited)
            .with_verify_checksums(false)
            .with_timeout(Duration::from_secs(10))
            .with_persist_queue(false);

        assert_eq!(config.data_dir, PathBuf::from("/maps"));
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.concurrency, ConcurrencyPolicy::Unlimited);
        assert!(!config.verify_checksums);
        assert!(!config.persist_queue);
        assert_eq!(config.queue_file(), PathBuf::from("/maps/download_queue.json"));
    }

    #[test]
    fn test_concurrency_policy() {
        assert!(ConcurrencyPolicy::OneAtATime.allows_another(0));
        assert!(!ConcurrencyPolicy::OneAtATime.allows_another(1));
        assert!(ConcurrencyPolicy::Unlimited.allows_another(100));
        assert_eq!(
            "Unlimited".parse::<ConcurrencyPolicy>(),
            Ok(ConcurrencyPolicy::Unlimited)
        );
        assert!("bogus".parse::<ConcurrencyPolicy>().is_err());
        assert_eq!(ConcurrencyPolicy::OneAtATime.to_string(), "one_at_a_time");
    }
}
