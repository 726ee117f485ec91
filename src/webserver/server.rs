/// Axum webserver lifecycle: bind, serve, graceful shutdown
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::{
    logger::{self, LogTag},
    webserver::{routes, state::AppState},
};

/// Bind `host:port` and serve until `shutdown` fires
pub async fn start_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown: Arc<Notify>,
) -> Result<(), String> {
    let addr = format!("{}:{}", host, port);

    let listener = TcpListener::bind(&addr).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => format!(
            "Failed to bind to {}: Address already in use\n\
             \n\
             Another process is listening on port {}. Stop it or pass --port.",
            addr, port
        ),
        std::io::ErrorKind::PermissionDenied => format!(
            "Failed to bind to {}: Permission denied\n\
             \n\
             Port {} requires elevated privileges on this system.\n\
             Consider using a port above 1024 or running with appropriate permissions.",
            addr, port
        ),
        _ => format!("Failed to bind to {}: {}", addr, e),
    })?;

    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: Arc<Notify>,
) -> Result<(), String> {
    let local = listener
        .local_addr()
        .map_err(|e| format!("Listener has no local address: {}", e))?;
    logger::info(
        LogTag::Webserver,
        &format!("Listening on http://{} (WebSocket at ws://{}/ws)", local, local),
    );

    let app = build_app(state);
    let shutdown_signal = async move {
        shutdown.notified().await;
        logger::info(LogTag::Webserver, "Received shutdown signal, stopping webserver...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .map_err(|e| format!("Server error: {}", e))?;

    logger::info(LogTag::Webserver, "Webserver stopped");
    Ok(())
}

fn build_app(state: Arc<AppState>) -> Router {
    routes::create_router(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerSettings};
    use crate::services::{ClientSettings, RegistrySettings, ReqwestTransport, ServiceClient, ServiceRegistry};
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    async fn start() -> (SocketAddr, Arc<Notify>) {
        let transport = Arc::new(ReqwestTransport::new());
        let registry = Arc::new(ServiceRegistry::new(
            RegistrySettings::default(),
            transport.clone(),
        ));
        let client = Arc::new(ServiceClient::new(
            ClientSettings::default(),
            registry,
            transport,
        ));
        let state = Arc::new(AppState::new(
            Broker::new(BrokerSettings::default()),
            client,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(serve(listener, state, shutdown.clone()));
        (addr, shutdown)
    }

    async fn next_json<S>(stream: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_websocket_end_to_end() {
        let (addr, shutdown) = start().await;
        let url = format!("ws://{}/ws", addr);

        let (mut a, _) = connect_async(url.as_str()).await.unwrap();
        let (mut b, _) = connect_async(url.as_str()).await.unwrap();

        let welcome_a = next_json(&mut a).await;
        assert_eq!(welcome_a["type"], "welcome");
        let a_id = welcome_a["client_id"].as_str().unwrap().to_string();
        assert!(welcome_a["timestamp"].as_i64().is_some());
        assert_eq!(next_json(&mut b).await["type"], "welcome");

        a.send(Message::Text(json!({"type": "join_channel", "channel": "lobby"}).to_string()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut a).await["type"], "channel_joined");

        b.send(Message::Text(json!({"type": "join_channel", "channel": "lobby"}).to_string()))
            .await
            .unwrap();
        let joined = next_json(&mut b).await;
        assert_eq!(joined["member_count"], 2);
        assert_eq!(next_json(&mut a).await["type"], "user_joined");

        a.send(Message::Text(
            json!({"type": "broadcast", "channel": "lobby", "message": {"text": "hi"}}).to_string(),
        ))
        .await
        .unwrap();
        let forwarded = next_json(&mut b).await;
        assert_eq!(forwarded["type"], "broadcast");
        assert_eq!(forwarded["from"], a_id.as_str());
        assert_eq!(forwarded["message"]["text"], "hi");

        // malformed frame: error reply, connection stays usable
        a.send(Message::Text("not json".to_string())).await.unwrap();
        let error = next_json(&mut a).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "Invalid message format");
        a.send(Message::Text(json!({"type": "ping"}).to_string()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut a).await["type"], "pong");

        a.close(None).await.unwrap();
        let left = next_json(&mut b).await;
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["client_id"], a_id.as_str());

        shutdown.notify_waiters();
    }

    #[tokio::test]
    async fn test_health_and_stats_endpoints() {
        let (addr, shutdown) = start().await;
        let http = reqwest::Client::new();

        let health: Value = http
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let stats: Value = http
            .get(format!("http://{}/api/stats", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["broker"]["connections"], 0);
        assert_eq!(stats["registry"]["total_instances"], 0);

        shutdown.notify_waiters();
    }
}
