//! Service client runtime
//!
//! `request` resolves a service name through the registry, picks one instance
//! with the load balancer, gates the call with the service's circuit breaker
//! and retries transient failures with exponential backoff on that instance.
//! Each logical request produces one metrics sample and one breaker update.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerStatus, CircuitBreakers};
use super::load_balancer::{LoadBalanceStrategy, LoadBalancer};
use super::metrics::{MetricsRecorder, ServiceMetrics};
use super::registry::ServiceRegistry;
use super::transport::{HttpMethod, HttpTransport, TransportRequest, TransportResponse};
use super::types::{DiscoveryFilter, ServiceRegistration};
use crate::config::ClientConfig;
use crate::errors::{ServiceError, TransportError};
use crate::logger::{self, LogTag};

/// Client settings derived from `[client]`
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    /// Total tries per request
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub retryable_status_codes: Vec<u16>,
    pub breaker: CircuitBreakerConfig,
    pub strategy: LoadBalanceStrategy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl ClientSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
            retryable_status_codes: config.retryable_status_codes.clone(),
            breaker: CircuitBreakerConfig::from_client_config(config),
            strategy: config.load_balancer,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    /// Overrides the configured per-attempt timeout
    pub timeout: Option<Duration>,
    /// Narrows the instances considered
    pub filter: DiscoveryFilter,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_filter(mut self, filter: DiscoveryFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Instance that answered
    pub instance_id: String,
    /// Tries used, including the successful one
    pub attempts: u32,
}

impl ServiceResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body)
    }
}

/// Client-side snapshot for `/api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub metrics: HashMap<String, ServiceMetrics>,
    pub circuits: Vec<CircuitBreakerStatus>,
}

enum AttemptFailure {
    Transport(TransportError),
    Status(TransportResponse),
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            AttemptFailure::Transport(e) => e.to_string(),
            AttemptFailure::Status(response) => format!("HTTP {}", response.status),
        }
    }
}

pub struct ServiceClient {
    settings: ClientSettings,
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn HttpTransport>,
    breakers: CircuitBreakers,
    balancer: LoadBalancer,
    metrics: MetricsRecorder,
}

impl ServiceClient {
    pub fn new(
        settings: ClientSettings,
        registry: Arc<ServiceRegistry>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            breakers: CircuitBreakers::new(settings.breaker.clone()),
            balancer: LoadBalancer::new(settings.strategy),
            metrics: MetricsRecorder::new(),
            settings,
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Call `path` on one instance of `service`
    pub async fn request(
        &self,
        service: &str,
        method: HttpMethod,
        path: &str,
        options: RequestOptions,
    ) -> Result<ServiceResponse, ServiceError> {
        let breaker = self.breakers.get_or_create(service);
        // dropping the permit on any early return or cancellation frees its probe slot
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(retry_after) => {
                logger::debug(
                    LogTag::Breaker,
                    &format!("Rejected call to '{}', circuit open", service),
                );
                return Err(ServiceError::CircuitOpen {
                    service: service.to_string(),
                    retry_after,
                });
            }
        };

        let instances = self.registry.discover_all(service, &options.filter).await;
        if instances.is_empty() {
            logger::warning(
                LogTag::Client,
                &format!("No instance registered for '{}'", service),
            );
            return Err(ServiceError::ServiceNotFound(service.to_string()));
        }

        let healthy: Vec<ServiceRegistration> =
            instances.iter().filter(|r| r.is_healthy()).cloned().collect();
        let candidates = if healthy.is_empty() { instances } else { healthy };

        let instance = match self.balancer.select(service, &candidates) {
            Some(instance) => instance.clone(),
            None => {
                return Err(ServiceError::ServiceNotFound(service.to_string()));
            }
        };

        let started = Instant::now();
        let result = {
            let _in_flight = self.balancer.begin(&instance.id);
            self.execute_with_retry(service, &instance, method, path, &options)
                .await
        };
        let elapsed = started.elapsed();

        self.metrics.record(service, elapsed, result.is_ok());
        match &result {
            Ok(response) => {
                permit.record_success();
                logger::debug(
                    LogTag::Client,
                    &format!(
                        "{} {}{} -> {} in {}ms ({} attempt(s))",
                        method,
                        service,
                        path,
                        response.status,
                        elapsed.as_millis(),
                        response.attempts
                    ),
                );
            }
            Err(e) => {
                permit.record_failure(&e.to_string());
                logger::warning(LogTag::Client, &format!("{} {}{} failed: {}", method, service, path, e));
            }
        }

        result
    }

    async fn execute_with_retry(
        &self,
        service: &str,
        instance: &ServiceRegistration,
        method: HttpMethod,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ServiceResponse, ServiceError> {
        let url = instance.url_for(path);
        let timeout = options.timeout.unwrap_or(self.settings.timeout);
        let max_attempts = self.settings.retry_attempts.max(1);

        let mut attempt = 0;
        let last_failure = loop {
            attempt += 1;

            let request = TransportRequest {
                method,
                url: url.clone(),
                headers: options.headers.clone(),
                body: options.body.clone(),
                timeout,
            };

            let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout {
                    url: url.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };

            let failure = match outcome {
                Ok(response) if response.is_success() => {
                    return Ok(ServiceResponse {
                        status: response.status,
                        headers: response.headers,
                        body: response.body,
                        instance_id: instance.id.clone(),
                        attempts: attempt,
                    });
                }
                Ok(response) => {
                    if !self.settings.retryable_status_codes.contains(&response.status) {
                        return Err(ServiceError::Status {
                            service: service.to_string(),
                            status: response.status,
                            body: response.body,
                        });
                    }
                    AttemptFailure::Status(response)
                }
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(ServiceError::Transport {
                            service: service.to_string(),
                            source: e,
                        });
                    }
                    AttemptFailure::Transport(e)
                }
            };

            if attempt >= max_attempts {
                break failure;
            }

            let delay = self.settings.backoff(attempt);
            logger::debug(
                LogTag::Client,
                &format!(
                    "Attempt {}/{} to {} failed ({}), retrying in {}ms",
                    attempt,
                    max_attempts,
                    url,
                    failure.describe(),
                    delay.as_millis()
                ),
            );
            tokio::time::sleep(delay).await;
        };

        if attempt > 1 {
            return Err(ServiceError::MaxRetriesExceeded {
                service: service.to_string(),
                attempts: attempt,
                last_error: last_failure.describe(),
            });
        }

        Err(match last_failure {
            AttemptFailure::Transport(source) => ServiceError::Transport {
                service: service.to_string(),
                source,
            },
            AttemptFailure::Status(response) => ServiceError::Status {
                service: service.to_string(),
                status: response.status,
                body: response.body,
            },
        })
    }

    // =========================================================================
    // CONVENIENCE HELPERS
    // =========================================================================

    pub async fn get(&self, service: &str, path: &str) -> Result<ServiceResponse, ServiceError> {
        self.request(service, HttpMethod::Get, path, RequestOptions::default())
            .await
    }

    pub async fn post(
        &self,
        service: &str,
        path: &str,
        body: Value,
    ) -> Result<ServiceResponse, ServiceError> {
        self.request(service, HttpMethod::Post, path, RequestOptions::json(body))
            .await
    }

    pub async fn put(
        &self,
        service: &str,
        path: &str,
        body: Value,
    ) -> Result<ServiceResponse, ServiceError> {
        self.request(service, HttpMethod::Put, path, RequestOptions::json(body))
            .await
    }

    pub async fn patch(
        &self,
        service: &str,
        path: &str,
        body: Value,
    ) -> Result<ServiceResponse, ServiceError> {
        self.request(service, HttpMethod::Patch, path, RequestOptions::json(body))
            .await
    }

    pub async fn delete(&self, service: &str, path: &str) -> Result<ServiceResponse, ServiceError> {
        self.request(service, HttpMethod::Delete, path, RequestOptions::default())
            .await
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    pub fn metrics(&self, service: &str) -> Option<ServiceMetrics> {
        self.metrics.get(service)
    }

    pub fn all_metrics(&self) -> HashMap<String, ServiceMetrics> {
        self.metrics.all()
    }

    pub fn reset_metrics(&self, service: Option<&str>) {
        self.metrics.reset(service);
    }

    pub fn circuit_status(&self, service: &str) -> Option<CircuitBreakerStatus> {
        self.breakers.status(service)
    }

    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        self.breakers.reset(service)
    }

    /// Open the breaker by hand (maintenance windows)
    pub fn force_open_circuit(&self, service: &str, reason: &str) {
        self.breakers.get_or_create(service).force_open(reason);
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            metrics: self.metrics.all(),
            circuits: self.breakers.all_statuses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::circuit_breaker::CircuitState;
    use crate::services::registry::RegistrySettings;
    use crate::services::transport::mock::MockTransport;
    use crate::services::types::RegisterOptions;

    fn settings() -> ClientSettings {
        ClientSettings {
            timeout: Duration::from_secs(5),
            retry_attempts: 1,
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(10),
            retryable_status_codes: vec![502, 503, 504],
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 1,
                half_open_max_calls: 1,
            },
            strategy: LoadBalanceStrategy::RoundRobin,
        }
    }

    async fn client_with(
        settings: ClientSettings,
        transport: Arc<MockTransport>,
        instances: &[(&str, u16)],
    ) -> ServiceClient {
        let registry = Arc::new(ServiceRegistry::new(
            RegistrySettings::default(),
            transport.clone(),
        ));
        for (host, port) in instances {
            registry
                .register("orders", RegisterOptions::new(*host, *port))
                .await;
        }
        ServiceClient::new(settings, registry, transport)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut s = settings();
        s.retry_delay = Duration::from_millis(1000);
        s.max_retry_delay = Duration::from_millis(3000);
        assert_eq!(s.backoff(1), Duration::from_millis(1000));
        assert_eq!(s.backoff(2), Duration::from_millis(2000));
        assert_eq!(s.backoff(3), Duration::from_millis(3000));
        assert_eq!(s.backoff(10), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_circuit_opens_and_short_circuits() {
        let transport = Arc::new(MockTransport::refused());
        let client = client_with(settings(), transport.clone(), &[("a", 1)]).await;

        for _ in 0..3 {
            let err = client.get("orders", "/list").await.unwrap_err();
            assert!(matches!(err, ServiceError::Transport { .. }), "got {err}");
        }
        for _ in 0..2 {
            let err = client.get("orders", "/list").await.unwrap_err();
            assert!(err.is_circuit_open());
        }

        assert_eq!(transport.calls(), 3);
        assert_eq!(
            client.circuit_status("orders").map(|s| s.state),
            Some(CircuitState::Open)
        );
        // rejected calls never reach the transport nor the metrics
        assert_eq!(client.metrics("orders").map(|m| m.failed_requests), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_status_then_succeeds() {
        let transport = Arc::new(MockTransport::ok());
        transport.push(Ok(TransportResponse::new(503, "busy")));
        transport.push(Ok(TransportResponse::new(502, "bad gateway")));
        let mut s = settings();
        s.retry_attempts = 3;
        let client = client_with(s, transport.clone(), &[("a", 1)]).await;

        let response = client.get("orders", "/list").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.attempts, 3);
        assert_eq!(transport.calls(), 3);

        let metrics = client.metrics("orders").unwrap();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_applied_between_attempts() {
        let transport = Arc::new(MockTransport::refused());
        let mut s = settings();
        s.retry_attempts = 3;
        s.retry_delay = Duration::from_millis(1000);
        s.max_retry_delay = Duration::from_millis(1500);
        let client = client_with(s, transport.clone(), &[("a", 1)]).await;

        let started = Instant::now();
        let err = client.get("orders", "/list").await.unwrap_err();
        let elapsed = started.elapsed();

        match err {
            ServiceError::MaxRetriesExceeded { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        // 1000ms, then 2000ms capped at 1500ms
        assert!(elapsed >= Duration::from_millis(2500));
        assert!(elapsed < Duration::from_millis(2600));
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let transport = Arc::new(MockTransport::always(Ok(TransportResponse::new(
            404,
            "missing",
        ))));
        let mut s = settings();
        s.retry_attempts = 3;
        let client = client_with(s, transport.clone(), &[("a", 1)]).await;

        let err = client.get("orders", "/nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 404, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_transport_error_fails_immediately() {
        let transport = Arc::new(MockTransport::always(Err(TransportError::Request {
            url: "http://a:1/list".to_string(),
            reason: "invalid header".to_string(),
        })));
        let mut s = settings();
        s.retry_attempts = 3;
        let client = client_with(s, transport.clone(), &[("a", 1)]).await;

        let err = client.get("orders", "/list").await.unwrap_err();
        assert!(matches!(err, ServiceError::Transport { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_a_breaker_failure() {
        let transport = Arc::new(MockTransport::ok());
        let client = client_with(settings(), transport.clone(), &[]).await;

        for _ in 0..5 {
            let err = client.get("orders", "/list").await.unwrap_err();
            assert!(matches!(err, ServiceError::ServiceNotFound(ref s) if s == "orders"));
        }
        assert_eq!(
            client.circuit_status("orders").map(|s| s.failure_count),
            Some(0)
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_round_robin_across_instances() {
        let transport = Arc::new(MockTransport::ok());
        let client = client_with(settings(), transport.clone(), &[("a", 1), ("b", 2)]).await;

        for _ in 0..4 {
            client.get("orders", "/ping").await.unwrap();
        }
        let urls = transport.urls.lock().clone();
        assert_eq!(
            urls,
            vec![
                "http://a:1/ping",
                "http://b:2/ping",
                "http://a:1/ping",
                "http://b:2/ping"
            ]
        );
    }

    #[tokio::test]
    async fn test_unhealthy_instances_are_skipped() {
        let transport = Arc::new(MockTransport::ok());
        transport.set_for_url("http://a:1/health", Ok(TransportResponse::new(500, "")));
        let client = client_with(settings(), transport.clone(), &[("a", 1), ("b", 2)]).await;
        client.registry().health_check_all().await;

        for _ in 0..3 {
            let response = client.get("orders", "/ping").await.unwrap();
            assert!(response.instance_id.starts_with("orders-b-2-"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery_through_client() {
        let transport = Arc::new(MockTransport::ok());
        transport.push(Err(TransportError::Connect {
            url: "http://a:1/list".to_string(),
            reason: "refused".to_string(),
        }));
        let mut s = settings();
        s.breaker.failure_threshold = 1;
        let client = client_with(s, transport.clone(), &[("a", 1)]).await;

        assert!(client.get("orders", "/list").await.is_err());
        assert!(client.get("orders", "/list").await.unwrap_err().is_circuit_open());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(client.get("orders", "/list").await.is_ok());
        assert_eq!(
            client.circuit_status("orders").map(|s| s.state),
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_post_sends_body_and_helpers_manage_state() {
        let transport = Arc::new(MockTransport::always(Ok(TransportResponse::new(
            201,
            r#"{"id":7}"#,
        ))));
        let client = client_with(settings(), transport.clone(), &[("a", 1)]).await;

        let response = client
            .post("orders", "/orders", serde_json::json!({"item": "book"}))
            .await
            .unwrap();
        assert_eq!(response.json().unwrap()["id"], 7);

        client.force_open_circuit("orders", "maintenance");
        assert!(client.delete("orders", "/orders/7").await.unwrap_err().is_circuit_open());
        assert!(client.reset_circuit_breaker("orders"));
        assert!(client.put("orders", "/orders/7", serde_json::json!({})).await.is_ok());

        client.reset_metrics(Some("orders"));
        assert!(client.metrics("orders").is_none());
        assert!(client.stats().circuits.iter().any(|c| c.service == "orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_breaker_with_default_retries() {
        let transport = Arc::new(MockTransport::refused());
        let mut s = ClientSettings::default();
        s.breaker.failure_threshold = 3;
        assert_eq!(s.retry_attempts, 3);
        let client = client_with(s, transport.clone(), &[("10.0.0.1", 8080)]).await;

        for _ in 0..3 {
            let err = client.get("orders", "/list").await.unwrap_err();
            assert!(
                matches!(err, ServiceError::MaxRetriesExceeded { attempts: 3, .. }),
                "got {err}"
            );
        }
        let before = transport.calls();
        assert_eq!(before, 9);

        for _ in 0..2 {
            let err = client.get("orders", "/list").await.unwrap_err();
            assert!(err.is_circuit_open());
        }
        assert_eq!(transport.calls(), before);
        assert!(transport
            .urls
            .lock()
            .iter()
            .all(|url| url == "http://10.0.0.1:8080/list"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_does_not_block_recovery() {
        let transport = Arc::new(MockTransport::ok().with_delay(Duration::from_secs(1)));
        let client = client_with(settings(), transport.clone(), &[("a", 1)]).await;

        client.force_open_circuit("orders", "maintenance");
        tokio::time::advance(Duration::from_secs(61)).await;

        // caller gives up while the only probe is in flight
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), client.get("orders", "/list")).await;
        assert!(abandoned.is_err());
        assert_eq!(
            client.circuit_status("orders").map(|s| s.state),
            Some(CircuitState::HalfOpen)
        );

        let response = client.get("orders", "/list").await;
        assert!(response.is_ok(), "got {:?}", response.err());
        assert_eq!(
            client.circuit_status("orders").map(|s| s.state),
            Some(CircuitState::Closed)
        );
    }
}
