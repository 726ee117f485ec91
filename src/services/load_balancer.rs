/// Instance selection strategies
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::types::ServiceRegistration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::LeastConnections => "least_connections",
        };
        f.write_str(s)
    }
}

type InFlight = Arc<Mutex<HashMap<String, usize>>>;

/// Picks one instance per call
///
/// Round-robin counters are per service name; in-flight counts are per
/// instance id and only move through `InFlightGuard`.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    counters: Mutex<HashMap<String, usize>>,
    in_flight: InFlight,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            counters: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// Select from `instances`; `None` only for an empty list
    pub fn select<'a>(
        &self,
        service: &str,
        instances: &'a [ServiceRegistration],
    ) -> Option<&'a ServiceRegistration> {
        if instances.is_empty() {
            return None;
        }

        let index = match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                let mut counters = self.counters.lock();
                let counter = counters.entry(service.to_string()).or_insert(0);
                let index = *counter % instances.len();
                *counter = counter.wrapping_add(1);
                index
            }
            LoadBalanceStrategy::Random => rand::thread_rng().gen_range(0..instances.len()),
            LoadBalanceStrategy::LeastConnections => {
                let in_flight = self.in_flight.lock();
                instances
                    .iter()
                    .enumerate()
                    .min_by_key(|(i, r)| (in_flight.get(&r.id).copied().unwrap_or(0), *i))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            }
        };

        instances.get(index)
    }

    /// Mark a call to `instance_id` as in flight until the guard drops
    pub fn begin(&self, instance_id: &str) -> InFlightGuard {
        *self
            .in_flight
            .lock()
            .entry(instance_id.to_string())
            .or_insert(0) += 1;
        InFlightGuard {
            in_flight: self.in_flight.clone(),
            instance_id: instance_id.to_string(),
        }
    }

    pub fn in_flight(&self, instance_id: &str) -> usize {
        self.in_flight.lock().get(instance_id).copied().unwrap_or(0)
    }
}

/// Decrements the instance's in-flight count on drop
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: InFlight,
    instance_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(&self.instance_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(&self.instance_id);
            }
        }
    }
}
