use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use super::{socket, state::AppState};
use crate::broker::BrokerStats;
use crate::services::{ClientStats, RegistryStats};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let broker = state.broker.clone();
    ws.on_upgrade(move |ws_socket| socket::handle_connection(ws_socket, addr, broker))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    uptime_secs: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.broker.connection_count(),
        uptime_secs: state.uptime_secs(),
    })
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    broker: BrokerStats,
    registry: RegistryStats,
    client: ClientStats,
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        broker: state.broker.stats(),
        registry: state.client.registry().stats(),
        client: state.client.stats(),
    })
}
