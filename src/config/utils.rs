/// Configuration utilities - loading and access helpers
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::path::Path;

use super::schemas::Config;
use crate::errors::ConfigError;
use crate::logger::{self, LogTag};

/// Global configuration instance
///
/// Access it through `with_config` / `get_config_clone`. Components receive
/// explicit settings derived from it, so tests never need the global.
pub static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/config.toml";

/// Parse and validate TOML contents
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Read a config file without touching the global
///
/// A missing file yields the defaults.
pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&contents)
}

/// Load configuration from a specific path and initialize the global
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = read_config_file(path)?;
    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| ConfigError::AlreadyInitialized)
}

/// Run a closure against the current configuration
///
/// Falls back to defaults when nothing was loaded.
pub fn with_config<F, R>(f: F) -> R
where
    F: FnOnce(&Config) -> R,
{
    let lock = CONFIG.get_or_init(|| RwLock::new(Config::default()));
    let config = lock.read();
    f(&config)
}

/// Clone of the entire configuration, for holding across await points
pub fn get_config_clone() -> Config {
    with_config(|cfg| cfg.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LoadBalanceStrategy;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.client.retry_attempts, 3);
        assert_eq!(config.registry.cache_ttl_secs, 300);
        assert_eq!(config.broker.heartbeat_interval_secs, 30);
    }

    #[test]
    fn test_partial_file_merges_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[broker]
port = 9100

[client]
failure_threshold = 2
load_balancer = "least_connections"

[[services]]
name = "orders"
host = "10.0.0.1"
port = 8080
tags = ["api"]
"#
        )
        .unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.broker.port, 9100);
        assert_eq!(config.broker.pong_timeout_secs, 10);
        assert_eq!(config.client.failure_threshold, 2);
        assert_eq!(config.client.load_balancer, LoadBalanceStrategy::LeastConnections);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].host.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[client]\nretry_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "client.retry_attempts"));

        let err = parse_config("[broker\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
