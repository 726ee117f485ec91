/// Logger configuration derived from command line flags
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;

use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::{get_cmd_args, patterns};

/// Runtime logger settings
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Messages above this level are dropped (Error is always kept)
    pub min_level: LogLevel,
    /// Tags with `--debug-<tag>` enabled
    pub debug_tags: HashSet<String>,
    /// Tags with `--verbose-<tag>` enabled
    pub verbose_tags: HashSet<String>,
    /// Mirror console output into a log file
    pub file_logging: bool,
    /// Directory for log files
    pub log_dir: PathBuf,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            file_logging: true,
            log_dir: PathBuf::from("data/logs"),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Snapshot of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Replace the logger configuration
pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

/// Mutate the logger configuration in place
pub fn update_logger_config<F: FnOnce(&mut LoggerConfig)>(f: F) {
    f(&mut LOGGER_CONFIG.write());
}

/// Build the configuration from `--debug-*`, `--verbose*` and `--quiet` flags
pub fn init_from_args() {
    let args = get_cmd_args();
    let mut config = LoggerConfig::default();

    for arg in &args {
        if let Some(tag) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(tag.to_string());
            if config.min_level < LogLevel::Debug {
                config.min_level = LogLevel::Debug;
            }
        } else if let Some(tag) = arg.strip_prefix("--verbose-") {
            config.verbose_tags.insert(tag.to_string());
            config.min_level = LogLevel::Verbose;
        }
    }

    if patterns::is_verbose_mode() {
        config.min_level = LogLevel::Verbose;
    }

    if patterns::is_quiet_mode() {
        config.min_level = LogLevel::Warning;
    }

    set_logger_config(config);
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = LOGGER_CONFIG.read();
    config.debug_tags.contains(&tag.to_debug_key()) || config.min_level == LogLevel::Verbose
}

pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().verbose_tags.contains(&tag.to_debug_key())
}
