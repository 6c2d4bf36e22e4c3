//! Daemon configuration
//!
//! Settings load from `treesync.toml` (next to the tree by default, or an
//! explicit `--config` path) and individual CLI flags override file values.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

pub const CONFIG_FILE: &str = "treesync.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Producer: the synchronized tree.
    pub tree_root: PathBuf,
    /// Consumer: local cache directory.
    pub cache_root: PathBuf,
    /// Consumer: origin base URL.
    pub origin: Option<Url>,
    /// Producer: origin server bind address.
    pub bind: SocketAddr,
    /// Watch mode: seconds between healing reconciliation passes.
    pub scan_interval_secs: u64,
    /// Mirror mode: seconds between update pulls.
    pub update_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tree_root: PathBuf::from("."),
            cache_root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("treesync"),
            origin: None,
            bind: ([127, 0, 0, 1], 8787).into(),
            scan_interval_secs: 300,
            update_interval_secs: 60,
        }
    }
}

impl Config {
    /// Load from an explicit path, or fall back to `treesync.toml` in the
    /// working directory, or defaults when neither exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self).expect("config serializes");
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.tree_root, PathBuf::from("."));
        assert!(config.origin.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.origin = Some(Url::parse("http://origin.example/tree/").unwrap());
        config.scan_interval_secs = 30;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.scan_interval_secs, 30);
        assert_eq!(
            loaded.origin.unwrap().as_str(),
            "http://origin.example/tree/"
        );
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "scan_interval_secs = 10\n").unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.scan_interval_secs, 10);
        assert_eq!(loaded.update_interval_secs, 60);
    }
}
