//! INI configuration file.
//!
//! ```ini
//! [storage]
//! data_dir = ~/maps
//! concurrency = one_at_a_time
//! verify_checksums = true
//! persist_queue = true
//!
//! [network]
//! servers = https://a.example/maps, https://b.example/maps
//! timeout = 300
//! ```
//!
//! Missing keys keep their defaults; a missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::{ConcurrencyPolicy, StorageConfig};

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl StorageConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads configuration from `path`, or the defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::WriteError)?;
        }
        let mut ini = Ini::new();
        ini.with_section(Some("storage"))
            .set("data_dir", self.data_dir.to_string_lossy())
            .set("concurrency", self.concurrency.to_string())
            .set("verify_checksums", self.verify_checksums.to_string())
            .set("persist_queue", self.persist_queue.to_string());
        ini.with_section(Some("network"))
            .set("servers", self.servers.join(", "))
            .set("timeout", self.timeout.as_secs().to_string());
        ini.write_to_file(path).map_err(ConfigFileError::WriteError)
    }
}

fn parse_ini(ini: &Ini) -> Result<StorageConfig, ConfigFileError> {
    let mut config = StorageConfig::default();

    if let Some(section) = ini.section(Some("storage")) {
        if let Some(v) = section.get("data_dir") {
            let v = v.trim();
            if !v.is_empty() {
                config.data_dir = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("concurrency") {
            config.concurrency = v
                .parse()
                .map_err(|reason| invalid("storage", "concurrency", v, reason))?;
        }
        if let Some(v) = section.get("verify_checksums") {
            config.verify_checksums = parse_bool(v);
        }
        if let Some(v) = section.get("persist_queue") {
            config.persist_queue = parse_bool(v);
        }
    }

    if let Some(section) = ini.section(Some("network")) {
        if let Some(v) = section.get("servers") {
            config.servers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches('/').to_string())
                .collect();
        }
        if let Some(v) = section.get("timeout") {
            let secs: u64 = v.trim().parse().map_err(|_| {
                invalid("network", "timeout", v, "must be a number of seconds".into())
            })?;
            if secs == 0 {
                return Err(invalid("network", "timeout", v, "must be positive".into()));
            }
            config.timeout = Duration::from_secs(secs);
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: String) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Default data directory (`$XDG_DATA_HOME/mapstore` or platform equivalent).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mapstore")
}

/// Default configuration file path.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mapstore")
        .join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::load_from(&temp.path().join("missing.ini")).unwrap();
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn test_partial_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(
            &path,
            "[storage]\nconcurrency = unlimited\n\n[network]\nservers = https://a.example/, https://b.example\n",
        )
        .unwrap();

        let config = StorageConfig::load_from(&path).unwrap();
        assert_eq!(config.concurrency, ConcurrencyPolicy::Unlimited);
        assert_eq!(config.servers, vec!["https://a.example", "https://b.example"]);
        assert!(config.verify_checksums);
    }

    #[test]
    fn test_invalid_concurrency() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[storage]\nconcurrency = sometimes\n").unwrap();

        match StorageConfig::load_from(&path) {
            Err(ConfigFileError::InvalidValue { key, .. }) => assert_eq!(key, "concurrency"),
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_timeout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[network]\ntimeout = 0\n").unwrap();
        assert!(StorageConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.ini");
        let config = StorageConfig::new(temp.path().join("maps"))
            .with_server("https://a.example")
            .with_concurrency(ConcurrencyPolicy::Unlimited)
            .with_timeout(Duration::from_secs(42))
            .with_persist_queue(false);

        config.save_to(&path).unwrap();
        assert_eq!(StorageConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/maps"), home.join("maps"));
        }
    }
}
