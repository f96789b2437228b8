use crate::codec::{LineCodec, DEFAULT_ADDRESS_WIDTH, DEFAULT_NAME_WIDTH};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_hosts_path")]
    pub hosts_path: Option<PathBuf>,
    /// Delay before reading after a change notification, and between read
    /// retries while the file is busy.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,
    #[serde(default = "default_address_width")]
    pub address_width: usize,
    #[serde(default = "default_name_width")]
    pub name_width: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hosts_path: default_hosts_path(),
            debounce_ms: default_debounce_ms(),
            persist_interval_ms: default_persist_interval_ms(),
            address_width: default_address_width(),
            name_width: default_name_width(),
        }
    }
}

/// The platform's hosts file.
pub fn default_hosts_path() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("windir").map(|windir| {
            PathBuf::from(windir)
                .join("System32")
                .join("drivers")
                .join("etc")
                .join("hosts")
        })
    } else {
        Some(PathBuf::from("/etc/hosts"))
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_persist_interval_ms() -> u64 {
    500
}

fn default_address_width() -> usize {
    DEFAULT_ADDRESS_WIDTH
}

fn default_name_width() -> usize {
    DEFAULT_NAME_WIDTH
}

impl SyncConfig {
    /// A default configuration for the given hosts file.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            hosts_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn hosts_path(&self) -> Result<&Path, ConfigError> {
        self.hosts_path.as_deref().ok_or(ConfigError::NoHostsPath)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn codec(&self) -> LineCodec {
        LineCodec::new(self.address_width, self.name_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.hosts_path, default_hosts_path());
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.persist_interval(), Duration::from_millis(500));
        assert_eq!(config.codec(), LineCodec::default());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "hosts_path": "/tmp/hosts",
            "debounce_ms": 250,
            "persist_interval_ms": 2000,
            "address_width": 20,
            "name_width": 30
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.hosts_path().unwrap(), Path::new("/tmp/hosts"));
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.persist_interval(), Duration::from_secs(2));
        assert_eq!(config.codec(), LineCodec::new(20, 30));
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SyncConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
    }
}
