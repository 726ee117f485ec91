/// Structured error types for nexa-realtime
///
/// Every error carries its classification from the point where it is
/// constructed; nothing downstream inspects message text to decide how to
/// react.
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// CONFIGURATION ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config field '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Config already initialized")]
    AlreadyInitialized,
}

// =============================================================================
// BROKER HANDLER ERRORS
// =============================================================================

/// Classification of a broker handler failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inbound frame is not a JSON envelope
    Parse,
    /// Caller is not allowed to perform the action
    Auth,
    /// Envelope shape or values are wrong
    Validation,
    /// Internal fault; the connection is force-closed
    Critical,
    /// Anything else worth reporting to the client
    Generic,
}

impl ErrorKind {
    /// Value of `error_type` in the `error` envelope
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Critical => "critical",
            ErrorKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error raised while handling one connection event
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse() -> Self {
        Self::new(ErrorKind::Parse, "Invalid message format")
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Critical, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message)
    }
}

// =============================================================================
// REGISTRY ERRORS
// =============================================================================

/// Failure inside a discovery backend
///
/// Never escapes `ServiceRegistry` discovery; it degrades to "no instance".
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Discovery backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },
}

// =============================================================================
// TRANSPORT ERRORS
// =============================================================================

/// Failure of one outbound HTTP exchange
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

impl TransportError {
    /// Timeouts and connection failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::Connect { .. }
        )
    }
}

// =============================================================================
// SERVICE CLIENT ERRORS
// =============================================================================

/// Failure surfaced to callers of `ServiceClient`
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Circuit breaker open for service '{service}' (retry in {}ms)", .retry_after.as_millis())]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    #[error("Max retries exceeded for service '{service}' after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        service: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Transport error calling service '{service}': {source}")]
    Transport {
        service: String,
        #[source]
        source: TransportError,
    },

    #[error("Service '{service}' responded with HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },
}

impl ServiceError {
    /// True when the breaker rejected the call without any I/O
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ServiceError::CircuitOpen { .. })
    }

    /// Service name the error refers to
    pub fn service(&self) -> &str {
        match self {
            ServiceError::ServiceNotFound(service) => service,
            ServiceError::CircuitOpen { service, .. }
            | ServiceError::MaxRetriesExceeded { service, .. }
            | ServiceError::Transport { service, .. }
            | ServiceError::Status { service, .. } => service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_retry_classification() {
        let timeout = TransportError::Timeout {
            url: "http://a".to_string(),
            timeout_ms: 10,
        };
        let refused = TransportError::Connect {
            url: "http://a".to_string(),
            reason: "refused".to_string(),
        };
        let bad = TransportError::Request {
            url: "http://a".to_string(),
            reason: "invalid header".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(refused.is_retryable());
        assert!(!bad.is_retryable());
    }

    #[test]
    fn test_handler_error_kinds() {
        assert_eq!(HandlerError::parse().message, "Invalid message format");
        assert_eq!(HandlerError::auth("nope").kind.as_str(), "auth");
        assert_eq!(
            HandlerError::critical("boom").to_string(),
            "critical error: boom"
        );
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::CircuitOpen {
            service: "orders".to_string(),
            retry_after: Duration::from_millis(1500),
        };
        assert!(err.is_circuit_open());
        assert_eq!(err.service(), "orders");
        assert!(err.to_string().contains("1500ms"));
    }
}
