/// Shared application state passed to all route handlers
use std::sync::Arc;

use crate::broker::Broker;
use crate::services::ServiceClient;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,

    /// Service client (its registry backs `/api/stats`)
    pub client: Arc<ServiceClient>,

    /// Server startup time
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, client: Arc<ServiceClient>) -> Self {
        Self {
            broker,
            client,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.startup_time).num_seconds()
    }
}
