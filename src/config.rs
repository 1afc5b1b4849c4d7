//! Configuration.
//!
//! Loads YAML configuration with a cascading priority system:
//! 1. `./onionlink.yaml` (current directory, highest priority)
//! 2. `~/.config/onionlink/onionlink.yaml`
//! 3. `/etc/onionlink/onionlink.yaml` (lowest priority)
//!
//! Values from higher priority files override lower ones; anything left
//! unset falls back to a built-in default.

use crate::link::manager::LinkOptions;
use crate::link::session::SESSION_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "onionlink.yaml";

/// Default UDP bind address.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7788";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid bind address '{addr}': {reason}")]
    InvalidBindAddr { addr: String, reason: String },
}

/// Node-level configuration (`node.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding identity key files. Defaults to the current
    /// directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl NodeConfig {
    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path of the Ed25519 identity key file.
    pub fn signing_key_path(&self) -> PathBuf {
        self.data_dir().join("identity.key")
    }

    /// Path of the X25519 encryption key file.
    pub fn encryption_key_path(&self) -> PathBuf {
        self.data_dir().join("encryption.key")
    }

    fn merge(&mut self, other: NodeConfig) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
    }
}

/// UDP endpoint configuration (`udp.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Bind address, `ip:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
}

impl UdpConfig {
    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        addr.parse().map_err(|e| ConfigError::InvalidBindAddr {
            addr: addr.to_string(),
            reason: format!("{}", e),
        })
    }

    fn merge(&mut self, other: UdpConfig) {
        if other.bind_addr.is_some() {
            self.bind_addr = other.bind_addr;
        }
    }
}

/// Link layer configuration (`link.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Send discard-message keepalives on idle sessions. Off by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<bool>,

    /// Idle milliseconds before a session is reaped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_ms: Option<u64>,
}

impl LinkConfig {
    /// Resolve into manager options.
    pub fn options(&self) -> LinkOptions {
        LinkOptions {
            keepalive: self.keepalive.unwrap_or(false),
            session_timeout_ms: self.session_timeout_ms.unwrap_or(SESSION_TIMEOUT_MS),
        }
    }

    fn merge(&mut self, other: LinkConfig) {
        if other.keepalive.is_some() {
            self.keepalive = other.keepalive;
        }
        if other.session_timeout_ms.is_some() {
            self.session_timeout_ms = other.session_timeout_ms;
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// UDP endpoint configuration (`udp.*`).
    #[serde(default)]
    pub udp: UdpConfig,

    /// Link layer configuration (`link.*`).
    #[serde(default)]
    pub link: LinkConfig,
}

impl Config {
    /// Standard search paths, lowest priority first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/onionlink").join(CONFIG_FILENAME)];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config/onionlink")
                    .join(CONFIG_FILENAME),
            );
        }
        paths.push(PathBuf::from(CONFIG_FILENAME));
        paths
    }

    /// Load and merge configuration from the standard search paths.
    ///
    /// Returns the merged config and the paths that were actually loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        Self::load_from_paths(&Self::search_paths())
    }

    /// Load and merge configuration from specific paths, later paths
    /// overriding earlier ones. Missing files are skipped.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            config.merge(Self::load_file(path)?);
            loaded.push(path.clone());
        }
        Ok((config, loaded))
    }

    /// Load a single config file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })
    }

    fn merge(&mut self, other: Config) {
        self.node.merge(other.node);
        self.udp.merge(other.udp);
        self.link.merge(other.link);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.udp.bind_addr().unwrap(),
            DEFAULT_BIND_ADDR.parse::<SocketAddr>().unwrap()
        );
        let options = config.link.options();
        assert!(!options.keepalive);
        assert_eq!(options.session_timeout_ms, SESSION_TIMEOUT_MS);
        assert_eq!(
            config.node.signing_key_path(),
            PathBuf::from("./identity.key")
        );
    }

    #[test]
    fn test_parse_yaml() {
        let config: Config = serde_yaml::from_str(
            "udp:\n  bind_addr: \"127.0.0.1:9999\"\nlink:\n  keepalive: true\n  session_timeout_ms: 5000\n",
        )
        .unwrap();
        assert_eq!(
            config.udp.bind_addr().unwrap(),
            "127.0.0.1:9999".parse::<SocketAddr>().unwrap()
        );
        let options = config.link.options();
        assert!(options.keepalive);
        assert_eq!(options.session_timeout_ms, 5000);
    }

    #[test]
    fn test_invalid_bind_addr() {
        let config: Config = serde_yaml::from_str("udp:\n  bind_addr: \"nope\"\n").unwrap();
        assert!(matches!(
            config.udp.bind_addr(),
            Err(ConfigError::InvalidBindAddr { .. })
        ));
    }

    #[test]
    fn test_merge_overrides() {
        let mut base: Config =
            serde_yaml::from_str("udp:\n  bind_addr: \"0.0.0.0:7788\"\nlink:\n  keepalive: false\n")
                .unwrap();
        let over: Config = serde_yaml::from_str("link:\n  keepalive: true\n").unwrap();
        base.merge(over);
        // Overridden field changes, untouched fields survive.
        assert!(base.link.options().keepalive);
        assert_eq!(base.udp.bind_addr.as_deref(), Some("0.0.0.0:7788"));
    }

    #[test]
    fn test_load_missing_paths_is_default() {
        let (config, loaded) =
            Config::load_from_paths(&[PathBuf::from("/nonexistent/onionlink.yaml")]).unwrap();
        assert!(loaded.is_empty());
        assert!(config.udp.bind_addr.is_none());
    }
}
