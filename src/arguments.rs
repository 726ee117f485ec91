/// Centralized argument handling for nexa-realtime
///
/// Stores the process command line once and exposes flag helpers used by the
/// logger (per-module debug modes) and by the binary (config path, bind
/// address overrides).
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
/// Thread-safe singleton that stores arguments for access throughout the application
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Debug flags understood by the logger (`--debug-<module>`)
pub const DEBUG_FLAGS: &[&str] = &[
    "--debug-system",
    "--debug-broker",
    "--debug-channels",
    "--debug-heartbeat",
    "--debug-registry",
    "--debug-health",
    "--debug-client",
    "--debug-breaker",
    "--debug-config",
    "--debug-webserver",
];

/// Sets the global command-line arguments
/// Used by tests to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
/// Returns None if the flag is not found or has no value
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

/// Returns every `--debug-*` flag present on the command line
pub fn get_enabled_debug_modes() -> Vec<&'static str> {
    DEBUG_FLAGS
        .iter()
        .copied()
        .filter(|flag| has_arg(flag))
        .collect()
}

/// Prints the enabled debug modes at startup
pub fn print_debug_info() {
    let enabled_modes = get_enabled_debug_modes();
    if !enabled_modes.is_empty() {
        println!("Enabled debug modes: {:?}", enabled_modes);
    }
}

/// Prints usage
pub fn print_help() {
    println!("nexa-realtime - WebSocket channel broker and service client runtime");
    println!();
    println!("USAGE:");
    println!("    nexa-realtime [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>      Configuration file (default: data/config.toml)");
    println!("    --host <host>        Override broker.host");
    println!("    --port <port>        Override broker.port");
    println!("    --verbose            Enable verbose logging for all modules");
    println!("    --quiet, -q          Only log warnings and errors");
    println!("    -h, --help           Print this help");
    println!();
    println!("DEBUG FLAGS:");
    for flag in DEBUG_FLAGS {
        println!("    {}", flag);
    }
}

// =============================================================================
// COMMON ARGUMENT PATTERNS
// =============================================================================

/// Common argument parsing patterns used by the binary
pub mod patterns {
    use super::*;

    /// Checks for help flags
    pub fn is_help_requested() -> bool {
        has_arg("--help") || has_arg("-h")
    }

    /// Checks for quiet/silent mode
    pub fn is_quiet_mode() -> bool {
        has_arg("--quiet") || has_arg("-q")
    }

    /// Checks for global verbose mode
    pub fn is_verbose_mode() -> bool {
        has_arg("--verbose")
    }

    /// Config file override
    pub fn get_config_path() -> Option<String> {
        get_arg_value("--config")
    }

    /// Broker host override
    pub fn get_host() -> Option<String> {
        get_arg_value("--host")
    }

    /// Broker port override
    pub fn get_port() -> Option<u16> {
        get_arg_value("--port").and_then(|s| s.parse().ok())
    }
}
