//! Per-service circuit breaker
//!
//! Closed -> Open after `failure_threshold` failures. Open rejects until
//! `recovery_timeout` has passed since the last failure, then the next
//! attempt moves to HalfOpen. HalfOpen admits at most `half_open_max_calls`
//! concurrent probes; `success_threshold` successes close the circuit, any
//! failure reopens it.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::logger::{self, LogTag};

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            success_threshold: config.success_threshold.max(1),
            half_open_max_calls: config.half_open_max_calls.max(1),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_opens: u64,
    last_error: Option<String>,
    /// Probes admitted in HalfOpen and not yet reported
    half_open_in_flight: u32,
    /// Bumped on every entry into HalfOpen; permits from an older round
    /// never touch the current count
    probe_round: u64,
}

impl BreakerInner {
    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.last_failure_time = Some(now);
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.total_opens += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.last_error = None;
    }

    fn retry_after(&self, recovery_timeout: Duration) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let elapsed = self.last_failure_time.map(|t| t.elapsed())?;
        Some(recovery_timeout.saturating_sub(elapsed))
    }
}

/// Breaker guarding one logical service
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                total_opens: 0,
                last_error: None,
                half_open_in_flight: 0,
                probe_round: 0,
            }),
        }
    }

    pub fn with_defaults(service: &str) -> Self {
        Self::new(service, CircuitBreakerConfig::default())
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Gate one call
    ///
    /// Returns Ok(()) if allowed, Err(Duration) with time until retry if blocked.
    /// A half-open slot taken here is only given back by an outcome;
    /// `try_acquire` also frees it when the call is abandoned.
    pub fn can_execute(&self) -> Result<(), Duration> {
        self.admit().map(|_| ())
    }

    /// Gate one call and hold its slot until the permit is settled or dropped
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, Duration> {
        let probe_round = self.admit()?;
        Ok(CallPermit {
            breaker: Arc::clone(self),
            probe_round,
            settled: false,
        })
    }

    /// Returns the probe round when the call took a half-open slot
    fn admit(&self) -> Result<Option<u64>, Duration> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(None),

            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.recovery_timeout);
                if elapsed < self.config.recovery_timeout {
                    return Err(self.config.recovery_timeout - elapsed);
                }

                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.half_open_in_flight = 1;
                inner.probe_round += 1;
                logger::info(
                    LogTag::Breaker,
                    &format!("Circuit for '{}' is half-open, probing", self.service),
                );
                Ok(Some(inner.probe_round))
            }

            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(Some(inner.probe_round))
                } else {
                    Err(Duration::from_millis(100))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }

            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.close();
                    logger::info(
                        LogTag::Breaker,
                        &format!("Circuit for '{}' closed after recovery", self.service),
                    );
                }
            }

            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &str) {
        let mut inner = self.inner.lock();
        inner.last_error = Some(error.to_string());
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.open(now);
                    logger::warning(
                        LogTag::Breaker,
                        &format!(
                            "Circuit for '{}' opened after {} failures: {}",
                            self.service, inner.failure_count, error
                        ),
                    );
                }
            }

            CircuitState::HalfOpen => {
                inner.open(now);
                logger::warning(
                    LogTag::Breaker,
                    &format!("Probe for '{}' failed, circuit reopened: {}", self.service, error),
                );
            }

            CircuitState::Open => {
                inner.last_failure_time = Some(now);
            }
        }
    }

    /// Give back a probe slot for a call that never reported an outcome
    fn release_probe_from(&self, round: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_round == round {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    pub fn force_open(&self, reason: &str) {
        let mut inner = self.inner.lock();
        inner.open(Instant::now());
        inner.last_error = Some(reason.to_string());
        logger::warning(
            LogTag::Breaker,
            &format!("Circuit for '{}' forced open: {}", self.service, reason),
        );
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        self.inner.lock().close();
        logger::debug(
            LogTag::Breaker,
            &format!("Circuit for '{}' reset", self.service),
        );
    }

    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_opens: inner.total_opens,
            last_error: inner.last_error.clone(),
            retry_after_ms: inner
                .retry_after(self.config.recovery_timeout)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// Admission for one call
///
/// Settle it with `record_success` or `record_failure`. Dropping it
/// unsettled (cancelled request, no instance to call) gives its half-open
/// slot back.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe_round: Option<u64>,
    settled: bool,
}

impl CallPermit {
    pub fn is_probe(&self) -> bool {
        self.probe_round.is_some()
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn record_failure(mut self, error: &str) {
        self.settled = true;
        self.breaker.record_failure(error);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(round) = self.probe_round {
            self.breaker.release_probe_from(round);
        }
    }
}

/// Snapshot of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_opens: u64,
    pub last_error: Option<String>,
    /// Remaining cool-down while open
    pub retry_after_ms: Option<u64>,
}

/// Breakers keyed by service name, created lazily
#[derive(Debug)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.clone())))
            .clone()
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(service).cloned()
    }

    pub fn status(&self, service: &str) -> Option<CircuitBreakerStatus> {
        self.get(service).map(|b| b.status())
    }

    pub fn all_statuses(&self) -> Vec<CircuitBreakerStatus> {
        let mut statuses: Vec<_> = self.breakers.read().values().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }

    /// Returns false when no breaker exists for `service`
    pub fn reset(&self, service: &str) -> bool {
        match self.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
