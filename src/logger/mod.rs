//! Structured logging for nexa-realtime
//!
//! Provides:
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via `--debug-<module>` flags
//! - Dual output: colored console + file persistence
//!
//! ## Usage
//!
//! ```rust
//! use nexa_realtime::logger::{self, LogTag};
//!
//! logger::error(LogTag::Client, "Call to orders failed");
//! logger::info(LogTag::Broker, "Connection opened");
//! logger::debug(LogTag::Channels, "lobby has 3 members"); // Only with --debug-channels
//! ```
//!
//! Call `logger::init()` once at startup.

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, init_from_args, set_logger_config, update_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Parses command line flags, then opens the log file.
pub fn init() {
    init_with(|_| {});
}

/// Like `init`, with a hook to apply file settings before the log file opens
pub fn init_with<F: FnOnce(&mut LoggerConfig)>(configure: F) {
    config::init_from_args();
    config::update_logger_config(configure);
    file::init_file_logging();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (only with `--debug-<tag>`)
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (only with `--verbose`)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush all pending log writes
pub fn flush() {
    file::flush_file_logging();
}
