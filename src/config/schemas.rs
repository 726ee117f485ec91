/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined with `config_struct!`, so any field missing from
/// the TOML file falls back to the value declared here.
use std::collections::HashMap;

use crate::config_struct;
use crate::errors::ConfigError;
use crate::services::{DiscoveryBackendKind, LoadBalanceStrategy};

// ============================================================================
// BROKER CONFIGURATION
// ============================================================================

config_struct! {
    /// WebSocket broker configuration
    pub struct BrokerConfig {
        /// Bind host for the HTTP/WebSocket listener
        host: String = "0.0.0.0".to_string(),

        /// Bind port
        port: u16 = 8080,

        /// Heartbeat sweep interval (server sends ping)
        heartbeat_interval_secs: u64 = 30,

        /// Time a connection has to answer a ping before the next sweep closes it
        pong_timeout_secs: u64 = 10,

        /// Per-connection outbound queue capacity
        send_buffer_size: usize = 256,

        /// Longest accepted channel name
        max_channel_name_length: usize = 128,

        /// Require `authenticate` before join/broadcast/private messages
        require_auth: bool = false,

        /// Close the connection when an auth error is reported
        close_on_auth_error: bool = false,

        /// Accepted tokens (token -> user id)
        auth_tokens: HashMap<String, String> = HashMap::new(),
    }
}

// ============================================================================
// REGISTRY CONFIGURATION
// ============================================================================

config_struct! {
    /// Service registry configuration
    pub struct RegistryConfig {
        /// Discovery backend (memory | consul | etcd | redis)
        backend: DiscoveryBackendKind = DiscoveryBackendKind::Memory,

        /// Discovery cache TTL
        cache_ttl_secs: u64 = 300,

        /// Timeout for one health probe
        health_check_timeout_ms: u64 = 5_000,

        /// Interval of the background health monitor (0 disables it)
        health_check_interval_secs: u64 = 30,

        // Defaults merged into every registration
        default_host: String = "localhost".to_string(),
        default_port: u16 = 80,
        default_protocol: String = "http".to_string(),
        default_health_check_path: String = "/health".to_string(),
        default_version: String = "1.0.0".to_string(),
    }
}

// ============================================================================
// SERVICE CLIENT CONFIGURATION
// ============================================================================

config_struct! {
    /// Outbound service call configuration
    pub struct ClientConfig {
        /// Total timeout for one attempt (connect + read)
        timeout_ms: u64 = 30_000,

        /// Total tries per request (1 = no retry)
        retry_attempts: u32 = 3,

        /// Delay before the first retry, doubled for each further retry
        retry_delay_ms: u64 = 1_000,

        /// Upper bound for the retry delay
        max_retry_delay_ms: u64 = 30_000,

        /// HTTP statuses treated as transient
        retryable_status_codes: Vec<u16> = vec![502, 503, 504],

        // Circuit breaker
        failure_threshold: u32 = 5,
        recovery_timeout_secs: u64 = 60,
        success_threshold: u32 = 3,
        half_open_max_calls: u32 = 3,

        /// Instance selection strategy
        load_balancer: LoadBalanceStrategy = LoadBalanceStrategy::RoundRobin,
    }
}

// ============================================================================
// STATIC SERVICES
// ============================================================================

config_struct! {
    /// Service instance registered at startup
    pub struct StaticServiceConfig {
        name: String = String::new(),
        host: Option<String> = None,
        port: Option<u16> = None,
        protocol: Option<String> = None,
        version: Option<String> = None,
        health_check_path: Option<String> = None,
        tags: Vec<String> = Vec::new(),
        metadata: HashMap<String, String> = HashMap::new(),
    }
}

// ============================================================================
// LOGGING CONFIGURATION
// ============================================================================

config_struct! {
    /// Log file settings (console filtering comes from command line flags)
    pub struct LoggingConfig {
        file_logging: bool = true,
        log_dir: String = "data/logs".to_string(),
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Root configuration
    pub struct Config {
        broker: BrokerConfig = BrokerConfig::default(),
        registry: RegistryConfig = RegistryConfig::default(),
        client: ClientConfig = ClientConfig::default(),
        logging: LoggingConfig = LoggingConfig::default(),
        services: Vec<StaticServiceConfig> = Vec::new(),
    }
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

impl Config {
    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        }

        if self.broker.host.is_empty() {
            return invalid("broker.host", "cannot be empty");
        }
        if self.broker.heartbeat_interval_secs == 0 {
            return invalid("broker.heartbeat_interval_secs", "must be > 0");
        }
        if self.broker.send_buffer_size == 0 {
            return invalid("broker.send_buffer_size", "must be > 0");
        }
        if self.client.retry_attempts == 0 {
            return invalid("client.retry_attempts", "must be >= 1");
        }
        if self.client.failure_threshold == 0 {
            return invalid("client.failure_threshold", "must be >= 1");
        }
        if self.client.success_threshold == 0 {
            return invalid("client.success_threshold", "must be >= 1");
        }
        if self.client.half_open_max_calls == 0 {
            return invalid("client.half_open_max_calls", "must be >= 1");
        }
        if self.services.iter().any(|s| s.name.is_empty()) {
            return invalid("services.name", "every static service needs a name");
        }

        Ok(())
    }
}
