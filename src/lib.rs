//! nexa-realtime
//!
//! - `broker`: WebSocket channel broker (connections, channels, heartbeat)
//! - `services`: service registry, circuit breaker, retrying client
//! - `webserver`: axum surface hosting the broker (feature `web`)

pub mod arguments;
#[macro_use]
pub mod config;
pub mod broker;
pub mod errors;
pub mod logger;
pub mod services;

#[cfg(feature = "web")]
pub mod webserver;
