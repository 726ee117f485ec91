/// Disconnection handler
use crate::broker::connection::ClientId;
use crate::broker::hub::{Broker, BrokerEvent};
use crate::broker::message::ServerMessage;
use crate::logger::{self, LogTag};

/// Detach `id` from its channels, notify the remaining members and purge
/// it. Returns false when the id is unknown.
pub fn handle(broker: &Broker, id: &ClientId) -> bool {
    let mut removed_channels = Vec::new();

    let (channels, user_id) = {
        let mut guard = broker.state.write();
        let state = &mut *guard;
        let mut connection = match state.connections.remove(id) {
            Some(connection) => connection,
            None => return false,
        };

        let mut channels: Vec<String> = connection.channels.drain().collect();
        channels.sort();

        for channel in &channels {
            if let Some(outcome) = state.channels.leave(channel, id) {
                let notice = ServerMessage::UserLeft {
                    channel: channel.clone(),
                    client_id: id.clone(),
                };
                broker.fan_out(state, &outcome.remaining, &notice, None);
                if outcome.removed {
                    removed_channels.push(channel.clone());
                }
            }
        }
        let user_id = connection.user_id().map(str::to_string);
        (channels, user_id)
    };

    broker.metrics().connection_closed();
    for channel in removed_channels {
        broker.emit(BrokerEvent::ChannelRemoved { channel });
    }
    broker.emit(BrokerEvent::Disconnected {
        client_id: id.clone(),
        channels: channels.clone(),
    });

    logger::info(
        LogTag::Broker,
        &format!(
            "Connection {} closed (user={}, channels left: {}, active={})",
            id,
            user_id.as_deref().unwrap_or("anonymous"),
            channels.len(),
            broker.connection_count()
        ),
    );
    true
}
