//! Connection broker
//!
//! - `hub`: the `Broker` (connections, channels, delivery, heartbeat)
//! - `message`: wire protocol (`ClientMessage`, `ServerMessage`)
//! - `connection` / `channels`: per-connection and per-channel state
//! - `handlers`: message, error and disconnection handlers
//! - `auth`: pluggable token authentication

pub mod auth;
pub mod channels;
pub mod connection;
pub mod handlers;
pub mod hub;
pub mod message;
pub mod metrics;

pub use auth::{Authenticator, StaticTokenAuthenticator};
pub use connection::{AuthState, ClientId, ConnectionState, Outbound};
pub use hub::{Broker, BrokerEvent, BrokerSettings, BrokerStats, HeartbeatReport};
pub use message::{parse_client_message, ClientMessage, ServerMessage};
pub use metrics::{HubMetrics, HubMetricsSnapshot};
