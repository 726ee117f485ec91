/// Inbound message handlers
use serde_json::Value;

use crate::broker::connection::{AuthState, ClientId};
use crate::broker::hub::{Broker, BrokerEvent};
use crate::broker::message::{ClientMessage, ServerMessage};
use crate::errors::HandlerError;
use crate::logger::{self, LogTag};

pub fn dispatch(broker: &Broker, id: &ClientId, message: ClientMessage) -> Result<(), HandlerError> {
    match message {
        ClientMessage::JoinChannel { channel } => join_channel(broker, id, &channel),
        ClientMessage::LeaveChannel { channel } => leave_channel(broker, id, &channel),
        ClientMessage::Broadcast { channel, message } => broadcast(broker, id, &channel, message),
        ClientMessage::PrivateMessage { target_id, message } => {
            private_message(broker, id, ClientId::from(target_id), message)
        }
        ClientMessage::Ping => ping(broker, id),
        ClientMessage::Authenticate { token } => authenticate(broker, id, &token),
    }
}

fn validate_channel_name(broker: &Broker, channel: &str) -> Result<(), HandlerError> {
    if channel.trim().is_empty() {
        return Err(HandlerError::validation("Channel name cannot be empty"));
    }
    let max = broker.settings().max_channel_name_length;
    if channel.len() > max {
        return Err(HandlerError::validation(format!(
            "Channel name exceeds {} characters",
            max
        )));
    }
    Ok(())
}

fn require_auth(broker: &Broker, id: &ClientId) -> Result<(), HandlerError> {
    if broker.settings().require_auth && !broker.is_authenticated(id) {
        return Err(HandlerError::auth("Authentication required"));
    }
    Ok(())
}

fn join_channel(broker: &Broker, id: &ClientId, channel: &str) -> Result<(), HandlerError> {
    validate_channel_name(broker, channel)?;
    require_auth(broker, id)?;

    let outcome = {
        let mut guard = broker.state.write();
        let state = &mut *guard;
        let connection = match state.connections.get_mut(id) {
            Some(connection) => connection,
            None => return Ok(()),
        };

        let outcome = state.channels.join(channel, id);
        connection.channels.insert(channel.to_string());

        broker.deliver(
            connection,
            ServerMessage::ChannelJoined {
                channel: channel.to_string(),
                member_count: outcome.member_count,
            },
        );

        if outcome.newly_joined {
            let members = state.channels.members(channel);
            let notice = ServerMessage::UserJoined {
                channel: channel.to_string(),
                client_id: id.clone(),
            };
            broker.fan_out(state, &members, &notice, Some(id));
        }
        outcome
    };

    if outcome.created {
        broker.emit(BrokerEvent::ChannelCreated {
            channel: channel.to_string(),
        });
    }
    if outcome.newly_joined {
        logger::debug(
            LogTag::Channels,
            &format!(
                "{} joined '{}' ({} member(s))",
                id, channel, outcome.member_count
            ),
        );
    }
    Ok(())
}

fn leave_channel(broker: &Broker, id: &ClientId, channel: &str) -> Result<(), HandlerError> {
    validate_channel_name(broker, channel)?;

    let outcome = {
        let mut guard = broker.state.write();
        let state = &mut *guard;
        let connection = match state.connections.get_mut(id) {
            Some(connection) => connection,
            None => return Ok(()),
        };

        connection.channels.remove(channel);
        let outcome = state.channels.leave(channel, id);

        broker.deliver(
            connection,
            ServerMessage::ChannelLeft {
                channel: channel.to_string(),
            },
        );

        if let Some(outcome) = &outcome {
            let notice = ServerMessage::UserLeft {
                channel: channel.to_string(),
                client_id: id.clone(),
            };
            broker.fan_out(state, &outcome.remaining, &notice, None);
        }
        outcome
    };

    if let Some(outcome) = outcome {
        logger::debug(LogTag::Channels, &format!("{} left '{}'", id, channel));
        if outcome.removed {
            broker.emit(BrokerEvent::ChannelRemoved {
                channel: channel.to_string(),
            });
        }
    }
    Ok(())
}

fn broadcast(
    broker: &Broker,
    id: &ClientId,
    channel: &str,
    message: Value,
) -> Result<(), HandlerError> {
    require_auth(broker, id)?;

    let state = broker.state.read();
    if !state.channels.is_member(channel, id) {
        return Err(HandlerError::auth(format!(
            "Not a member of channel '{}'",
            channel
        )));
    }

    let members = state.channels.members(channel);
    let forwarded = ServerMessage::Broadcast {
        channel: channel.to_string(),
        from: id.clone(),
        message,
    };
    let delivered = broker.fan_out(&state, &members, &forwarded, Some(id));

    logger::debug(
        LogTag::Channels,
        &format!(
            "{} broadcast to '{}' ({} delivered)",
            id, channel, delivered
        ),
    );
    Ok(())
}

fn private_message(
    broker: &Broker,
    id: &ClientId,
    target: ClientId,
    message: Value,
) -> Result<(), HandlerError> {
    require_auth(broker, id)?;

    let state = broker.state.read();
    let recipient = match state.connections.get(&target) {
        Some(connection) if connection.is_open() => connection,
        _ => {
            return Err(HandlerError::validation(format!(
                "Unknown target client: {}",
                target
            )))
        }
    };

    broker.deliver(
        recipient,
        ServerMessage::PrivateMessage {
            from: id.clone(),
            message,
        },
    );

    if let Some(sender) = state.connections.get(id) {
        broker.deliver(sender, ServerMessage::MessageSent { target_id: target });
    }
    Ok(())
}

fn ping(broker: &Broker, id: &ClientId) -> Result<(), HandlerError> {
    // heartbeat was refreshed when the frame arrived
    broker.send_to_client(id, ServerMessage::Pong);
    Ok(())
}

fn authenticate(broker: &Broker, id: &ClientId, token: &str) -> Result<(), HandlerError> {
    let user_id = broker
        .authenticator()
        .authenticate(token)
        .ok_or_else(|| HandlerError::auth("Invalid authentication token"))?;

    let mut state = broker.state.write();
    if let Some(connection) = state.connections.get_mut(id) {
        connection.auth = AuthState::Authenticated {
            user_id: user_id.clone(),
        };
        broker.deliver(
            connection,
            ServerMessage::Authenticated {
                client_id: id.clone(),
                user_id: user_id.clone(),
            },
        );
    }
    drop(state);

    logger::info(
        LogTag::Broker,
        &format!("{} authenticated as {}", id, user_id),
    );
    Ok(())
}
