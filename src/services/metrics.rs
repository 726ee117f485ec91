//! Per-service call metrics

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Aggregated counters for one service name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Milliseconds; 0 before the first sample
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub average_response_time_ms: f64,
    pub last_request_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    total_response_time_ms: f64,
}

impl ServiceMetrics {
    fn record(&mut self, elapsed: Duration, success: bool) {
        let ms = elapsed.as_secs_f64() * 1000.0;

        if self.total_requests == 0 {
            self.min_response_time_ms = ms;
            self.max_response_time_ms = ms;
        } else {
            self.min_response_time_ms = self.min_response_time_ms.min(ms);
            self.max_response_time_ms = self.max_response_time_ms.max(ms);
        }

        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.total_response_time_ms += ms;
        self.average_response_time_ms = self.total_response_time_ms / self.total_requests as f64;
        self.last_request_time = Some(Utc::now());
    }

    /// Fraction of successful requests (0.0 when nothing was recorded)
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Metrics keyed by service name
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    services: RwLock<HashMap<String, ServiceMetrics>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sample per logical request
    pub fn record(&self, service: &str, elapsed: Duration, success: bool) {
        self.services
            .write()
            .entry(service.to_string())
            .or_default()
            .record(elapsed, success);
    }

    pub fn get(&self, service: &str) -> Option<ServiceMetrics> {
        self.services.read().get(service).cloned()
    }

    pub fn all(&self) -> HashMap<String, ServiceMetrics> {
        self.services.read().clone()
    }

    /// Reset one service, or everything with `None`
    pub fn reset(&self, service: Option<&str>) {
        let mut services = self.services.write();
        match service {
            Some(name) => {
                services.remove(name);
            }
            None => services.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregates() {
        let recorder = MetricsRecorder::new();
        recorder.record("orders", Duration::from_millis(10), true);
        recorder.record("orders", Duration::from_millis(30), false);
        recorder.record("orders", Duration::from_millis(20), true);

        let m = recorder.get("orders").unwrap();
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.successful_requests, 2);
        assert_eq!(m.failed_requests, 1);
        assert_eq!(m.min_response_time_ms, 10.0);
        assert_eq!(m.max_response_time_ms, 30.0);
        assert!((m.average_response_time_ms - 20.0).abs() < 1e-9);
        assert!(m.last_request_time.is_some());
        assert!((m.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_single_and_all() {
        let recorder = MetricsRecorder::new();
        recorder.record("a", Duration::from_millis(1), true);
        recorder.record("b", Duration::from_millis(1), true);

        recorder.reset(Some("a"));
        assert!(recorder.get("a").is_none());
        assert!(recorder.get("b").is_some());

        recorder.reset(None);
        assert!(recorder.all().is_empty());
    }
}
