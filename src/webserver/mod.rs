//! HTTP surface (feature `web`)
//!
//! - `GET /ws`: WebSocket upgrade into the broker
//! - `GET /health`: liveness
//! - `GET /api/stats`: broker, registry and client snapshot

pub mod routes;
pub mod server;
pub mod socket;
pub mod state;

pub use server::{serve, start_server};
pub use state::AppState;
