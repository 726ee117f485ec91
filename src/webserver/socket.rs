/// WebSocket connection task
///
/// Bridges one socket to the broker: inbound frames go to
/// `Broker::on_message`, the connection's outbound queue is written to the
/// socket. The broker decides when a connection closes.
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{
    broker::{Broker, ClientId, Outbound},
    logger::{self, LogTag},
};

pub async fn handle_connection(socket: WebSocket, addr: SocketAddr, broker: Arc<Broker>) {
    let (id, mut outbound) = broker.on_open(Some(addr));
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Broker -> client
            item = outbound.recv() => {
                match item {
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    Some(item) => {
                        if let Err(e) = forward_to_client(&mut ws_tx, item).await {
                            broker.on_error(&id, &format!("send failed: {}", e));
                            break;
                        }
                    }
                }
            }

            // Client -> broker
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => broker.on_message(&id, &text),
                    Some(Ok(Message::Binary(bytes))) => broker.on_binary(&id, &bytes),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        broker.record_activity(&id);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        logger::debug(
                            LogTag::Webserver,
                            &format!("Connection {}: client closed", id),
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        broker.on_error(&id, &e.to_string());
                        break;
                    }
                }
            }
        }
    }

    broker.on_close(&id);
    log_closed(&id);
}

async fn forward_to_client(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    item: Outbound,
) -> Result<(), axum::Error> {
    match item {
        Outbound::Message(message) => match message.to_json() {
            Ok(json) => ws_tx.send(Message::Text(json)).await,
            Err(e) => {
                logger::error(
                    LogTag::Webserver,
                    &format!("Failed to serialize {}: {}", message.type_name(), e),
                );
                Ok(())
            }
        },
        Outbound::Ping => ws_tx.send(Message::Ping(Vec::new())).await,
        Outbound::Close => ws_tx.send(Message::Close(None)).await,
    }
}

fn log_closed(id: &ClientId) {
    logger::debug(LogTag::Webserver, &format!("Connection {} task finished", id));
}
