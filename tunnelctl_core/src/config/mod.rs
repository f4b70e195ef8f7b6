//! Configuration management module for tunnelctl.
//!
//! Two kinds of configuration live here:
//!
//! - the TOML settings file ([`Config`]) that tunes the isolate manager,
//!   the tunnel controller and logging;
//! - the WireGuard tunnel configuration model ([`wireguard`]), which is what
//!   a `ConfigReference` ultimately resolves to.

pub mod wireguard;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use wireguard::{VpnConfiguration, VpnPeer, WgConfigError};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Platform backend used to realise tunnels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Kernel WireGuard driven through `ip`, `wg` and `resolvconf`
    #[default]
    Kernel,
    /// In-process adapters, nothing touches the host network
    Memory,
}

/// Isolate manager settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IsolateConfig {
    /// Maximum number of execution contexts alive at once (default: 16)
    #[serde(default = "default_max_isolates")]
    pub max_isolates: usize,

    /// How long teardown waits for in-flight runtime work (default: 1000)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_max_isolates() -> usize {
    16
}

fn default_shutdown_timeout_ms() -> u64 {
    1_000
}

impl Default for IsolateConfig {
    fn default() -> Self {
        IsolateConfig {
            max_isolates: default_max_isolates(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl IsolateConfig {
    /// Returns the shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Tunnel controller settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Directories searched for `<name>.conf` when a bare interface name is given
    #[serde(default = "default_search_path")]
    pub search_path: Vec<PathBuf>,

    /// Interface name used for inline configuration (default: "wg0")
    #[serde(default = "default_interface_name")]
    pub default_interface_name: String,

    /// MTU applied when a configuration does not set one
    #[serde(default)]
    pub default_mtu: Option<u32>,

    /// Platform backend (default: kernel)
    #[serde(default)]
    pub backend: Backend,

    /// Run PreUp/PostUp/PreDown/PostDown hooks (default: true)
    #[serde(default = "default_true")]
    pub run_hooks: bool,
}

fn default_search_path() -> Vec<PathBuf> {
    if cfg!(target_os = "linux") {
        vec![PathBuf::from("/etc/wireguard")]
    } else if let Some(config_dir) = dirs::config_dir() {
        vec![config_dir.join("tunnelctl").join("tunnels")]
    } else {
        vec![PathBuf::from(".")]
    }
}

fn default_interface_name() -> String {
    "wg0".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TunnelConfig {
    fn default() -> Self {
        TunnelConfig {
            search_path: default_search_path(),
            default_interface_name: default_interface_name(),
            default_mtu: None,
            backend: Backend::default(),
            run_hooks: default_true(),
        }
    }
}

/// Main settings structure for tunnelctl.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Isolate manager settings
    #[serde(default)]
    pub isolate: IsolateConfig,

    /// Tunnel controller settings
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            isolate: IsolateConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Config {
    /// Read settings from a TOML file, then apply `TUNNELCTL_*` overrides.
    ///
    /// Both the file and the overridden result are validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::IoError(e),
        })?;

        let mut config: Config = toml::from_str(&content)?;
        config.validate()?;
        Self::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Default settings with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        Self::apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, else the default settings file when it
    /// exists, else fall back to [`Config::from_env`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Self::from_env()
                }
            }
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "log_level".to_string(),
                    message: format!("unknown level '{}'", other),
                });
            }
        }

        if self.isolate.max_isolates == 0 {
            return Err(ConfigError::InvalidValue {
                key: "isolate.max_isolates".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !wireguard::is_valid_interface_name(&self.tunnel.default_interface_name) {
            return Err(ConfigError::InvalidValue {
                key: "tunnel.default_interface_name".to_string(),
                message: format!(
                    "'{}' is not a valid interface name",
                    self.tunnel.default_interface_name
                ),
            });
        }

        if let Some(mtu) = self.tunnel.default_mtu {
            if !(576..=65_535).contains(&mtu) {
                return Err(ConfigError::InvalidValue {
                    key: "tunnel.default_mtu".to_string(),
                    message: format!("{} is outside 576..=65535", mtu),
                });
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: TUNNELCTL_)
    /// Keys:
    /// - TUNNELCTL_LOG_LEVEL
    /// - TUNNELCTL_MAX_ISOLATES, TUNNELCTL_SHUTDOWN_TIMEOUT_MS
    /// - TUNNELCTL_BACKEND, TUNNELCTL_RUN_HOOKS, TUNNELCTL_DEFAULT_MTU,
    ///   TUNNELCTL_DEFAULT_INTERFACE
    /// - TUNNELCTL_CONFIG_PATH (platform path-separator list)
    fn apply_env_overrides(cfg: &mut Config) {
        use std::env;

        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }

        if let Ok(v) = env::var("TUNNELCTL_LOG_LEVEL") {
            if !v.is_empty() {
                cfg.log_level = v.to_ascii_lowercase();
            }
        }

        // Isolate
        if let Ok(v) = env::var("TUNNELCTL_MAX_ISOLATES") {
            if let Ok(n) = v.parse() {
                cfg.isolate.max_isolates = n;
            }
        }
        if let Ok(v) = env::var("TUNNELCTL_SHUTDOWN_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.isolate.shutdown_timeout_ms = n;
            }
        }

        // Tunnel
        if let Ok(v) = env::var("TUNNELCTL_BACKEND") {
            cfg.tunnel.backend = match v.to_ascii_lowercase().as_str() {
                "memory" => Backend::Memory,
                "kernel" => Backend::Kernel,
                _ => cfg.tunnel.backend,
            };
        }
        if let Ok(v) = env::var("TUNNELCTL_RUN_HOOKS") {
            if let Some(b) = parse_bool(&v) {
                cfg.tunnel.run_hooks = b;
            }
        }
        if let Ok(v) = env::var("TUNNELCTL_DEFAULT_MTU") {
            if let Ok(n) = v.parse() {
                cfg.tunnel.default_mtu = Some(n);
            }
        }
        if let Ok(v) = env::var("TUNNELCTL_DEFAULT_INTERFACE") {
            if !v.is_empty() {
                cfg.tunnel.default_interface_name = v;
            }
        }
        if let Some(v) = env::var_os("TUNNELCTL_CONFIG_PATH") {
            let paths: Vec<PathBuf> = env::split_paths(&v)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                cfg.tunnel.search_path = paths;
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tunnelctl").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.isolate.max_isolates, 16);
        assert_eq!(config.tunnel.default_interface_name, "wg0");
        assert_eq!(config.tunnel.backend, Backend::Kernel);
        assert!(config.tunnel.run_hooks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();

        let config_str = r#"
            log_level = "debug"

            [isolate]
            max_isolates = 2

            [tunnel]
            search_path = ["/tmp/tunnels"]
            default_mtu = 1380
            backend = "memory"
            run_hooks = false
        "#;

        file.write_all(config_str.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.isolate.max_isolates, 2);
        assert_eq!(config.isolate.shutdown_timeout_ms, 1_000);
        assert_eq!(config.tunnel.search_path, vec![PathBuf::from("/tmp/tunnels")]);
        assert_eq!(config.tunnel.default_mtu, Some(1380));
        assert_eq!(config.tunnel.backend, Backend::Memory);
        assert!(!config.tunnel.run_hooks);
    }

    #[test]
    fn test_save_config() {
        let file = NamedTempFile::new().unwrap();

        let mut config = Config::default();
        config.log_level = "warn".to_string();
        config.tunnel.backend = Backend::Memory;
        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.log_level, "warn");
        assert_eq!(loaded.tunnel.backend, Backend::Memory);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.isolate.max_isolates = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "isolate.max_isolates"
        ));

        let mut config = Config::default();
        config.tunnel.default_interface_name = "this-name-is-far-too-long".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tunnel.default_mtu = Some(100);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load("/definitely/not/here/tunnelctl.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
