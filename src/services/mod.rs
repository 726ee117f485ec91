//! Service client runtime
//!
//! - `registry`: registrations, discovery cache, health checks
//! - `backend`: external discovery stores (`DiscoveryBackend`)
//! - `circuit_breaker`, `load_balancer`, `metrics`: per-service call state
//! - `transport`: the outbound HTTP primitive
//! - `client`: `ServiceClient`, which ties them together

pub mod backend;
pub mod circuit_breaker;
pub mod client;
pub mod load_balancer;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod types;

pub use backend::{DiscoveryBackend, DiscoveryBackendKind, MemoryBackend};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitBreakers, CircuitState,
};
pub use client::{ClientSettings, ClientStats, RequestOptions, ServiceClient, ServiceResponse};
pub use load_balancer::{InFlightGuard, LoadBalanceStrategy, LoadBalancer};
pub use metrics::{MetricsRecorder, ServiceMetrics};
pub use registry::{RegistrySettings, ServiceRegistry};
pub use transport::{
    HttpMethod, HttpTransport, ReqwestTransport, TransportRequest, TransportResponse,
};
pub use types::{
    DiscoveryFilter, RegisterOptions, RegistryStats, ServiceRegistration, ServiceStatus,
};
