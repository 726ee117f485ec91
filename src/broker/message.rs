/// Broker wire protocol
///
/// Every frame is a single JSON object carrying a `type` field. Inbound
/// frames are parsed in two steps (generic JSON, then the typed enum) so a
/// malformed frame, an unknown type and a known type with bad fields each
/// map to their own error kind.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::connection::ClientId;
use crate::errors::HandlerError;

/// Inbound types the broker understands
pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "join_channel",
    "leave_channel",
    "broadcast",
    "private_message",
    "ping",
    "authenticate",
];

// ============================================================================
// CLIENT MESSAGES (Client → Server)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinChannel {
        channel: String,
    },

    LeaveChannel {
        channel: String,
    },

    /// Fan out to every other member of `channel`
    Broadcast {
        channel: String,
        message: Value,
    },

    PrivateMessage {
        target_id: String,
        message: Value,
    },

    Ping,

    Authenticate {
        token: String,
    },
}

impl ClientMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinChannel { .. } => "join_channel",
            ClientMessage::LeaveChannel { .. } => "leave_channel",
            ClientMessage::Broadcast { .. } => "broadcast",
            ClientMessage::PrivateMessage { .. } => "private_message",
            ClientMessage::Ping => "ping",
            ClientMessage::Authenticate { .. } => "authenticate",
        }
    }
}

/// Parse one inbound text frame
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, HandlerError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| HandlerError::parse())?;

    let message_type = match value.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(HandlerError::validation("Message type must be a string")),
        None if value.is_object() => {
            return Err(HandlerError::validation("Missing message type"))
        }
        None => return Err(HandlerError::parse()),
    };

    if !CLIENT_MESSAGE_TYPES.contains(&message_type.as_str()) {
        return Err(HandlerError::validation(format!(
            "Unknown message type: {}",
            message_type
        )));
    }

    serde_json::from_value(value).map_err(|e| {
        HandlerError::validation(format!("Invalid {} message: {}", message_type, e))
    })
}

// ============================================================================
// SERVER MESSAGES (Server → Client)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        client_id: ClientId,
        message: String,
    },

    ChannelJoined {
        channel: String,
        member_count: usize,
    },

    ChannelLeft {
        channel: String,
    },

    UserJoined {
        channel: String,
        client_id: ClientId,
    },

    UserLeft {
        channel: String,
        client_id: ClientId,
    },

    Broadcast {
        channel: String,
        from: ClientId,
        message: Value,
    },

    PrivateMessage {
        from: ClientId,
        message: Value,
    },

    MessageSent {
        target_id: ClientId,
    },

    Pong,

    Authenticated {
        client_id: ClientId,
        user_id: String,
    },

    Error {
        message: String,
        error_type: String,
    },
}

impl ServerMessage {
    pub fn error(error: &HandlerError) -> Self {
        ServerMessage::Error {
            message: error.message.clone(),
            error_type: error.kind.as_str().to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::ChannelJoined { .. } => "channel_joined",
            ServerMessage::ChannelLeft { .. } => "channel_left",
            ServerMessage::UserJoined { .. } => "user_joined",
            ServerMessage::UserLeft { .. } => "user_left",
            ServerMessage::Broadcast { .. } => "broadcast",
            ServerMessage::PrivateMessage { .. } => "private_message",
            ServerMessage::MessageSent { .. } => "message_sent",
            ServerMessage::Pong => "pong",
            ServerMessage::Authenticated { .. } => "authenticated",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// JSON object with `timestamp` (unix milliseconds) added
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert(
                "timestamp".to_string(),
                Value::from(Utc::now().timestamp_millis()),
            );
        }
        Ok(value)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            parse_client_message(r#"{"type":"join_channel","channel":"lobby"}"#).unwrap(),
            ClientMessage::JoinChannel {
                channel: "lobby".to_string()
            }
        );
        assert_eq!(
            parse_client_message(r#"{"type":"ping","id":1}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            parse_client_message(r#"{"type":"broadcast","channel":"c","message":{"text":"hi"}}"#)
                .unwrap(),
            ClientMessage::Broadcast {
                channel: "c".to_string(),
                message: json!({"text": "hi"}),
            }
        );
    }

    #[test]
    fn test_parse_error_kinds() {
        let err = parse_client_message("not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.message, "Invalid message format");

        let err = parse_client_message(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "Unknown message type: dance");

        let err = parse_client_message(r#"{"type":"join_channel"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = parse_client_message(r#"{"channel":"x"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = parse_client_message("[1,2]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_server_message_wire_format() {
        let value = ServerMessage::ChannelJoined {
            channel: "lobby".to_string(),
            member_count: 2,
        }
        .to_value()
        .unwrap();
        assert_eq!(value["type"], "channel_joined");
        assert_eq!(value["member_count"], 2);
        assert!(value["timestamp"].as_i64().unwrap() > 0);

        let pong = ServerMessage::Pong.to_value().unwrap();
        assert_eq!(pong["type"], "pong");

        let error = ServerMessage::error(&HandlerError::parse()).to_value().unwrap();
        assert_eq!(error["message"], "Invalid message format");
        assert_eq!(error["error_type"], "parse");
    }
}
