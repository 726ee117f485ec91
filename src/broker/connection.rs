/// Per-connection state owned by the broker
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::message::ServerMessage;
use super::metrics::ConnectionMetrics;

/// Opaque client identifier (UUID v4, never reused)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Connecting -> Open -> Closing
///
/// Closed is not stored: a closed connection is purged and its id no
/// longer has a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated { user_id: String },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }
}

/// Item on a connection's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Transport-level ping frame
    Ping,
    /// Send a close frame and stop the socket task
    Close,
}

/// Sender half of a connection's bounded outbound queue
pub type ConnectionSender = mpsc::Sender<Outbound>;

#[derive(Debug)]
pub struct Connection {
    pub id: ClientId,
    pub remote_addr: Option<SocketAddr>,
    /// Joined channel names
    pub channels: HashSet<String>,
    pub state: ConnectionState,
    pub auth: AuthState,
    pub last_heartbeat: Instant,
    /// Set when a ping is sent, cleared by any inbound frame
    pub ping_sent_at: Option<Instant>,
    pub connected_at: DateTime<Utc>,
    pub sender: ConnectionSender,
    pub metrics: Arc<ConnectionMetrics>,
}

impl Connection {
    pub fn new(id: ClientId, remote_addr: Option<SocketAddr>, sender: ConnectionSender) -> Self {
        Self {
            id,
            remote_addr,
            channels: HashSet::new(),
            state: ConnectionState::Connecting,
            auth: AuthState::Anonymous,
            last_heartbeat: Instant::now(),
            ping_sent_at: None,
            connected_at: Utc::now(),
            sender,
            metrics: ConnectionMetrics::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Any inbound frame counts as proof of life
    pub fn record_activity(&mut self) {
        self.last_heartbeat = Instant::now();
        self.ping_sent_at = None;
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.auth {
            AuthState::Authenticated { user_id } => Some(user_id),
            AuthState::Anonymous => None,
        }
    }

    /// Non-blocking enqueue; a full or closed queue drops the item
    pub fn enqueue(&self, item: Outbound) -> Result<(), mpsc::error::TrySendError<Outbound>> {
        let result = self.sender.try_send(item);
        match &result {
            Ok(()) => {
                self.metrics.inc_sent();
                self.metrics.set_queue_size(self.sender.max_capacity() - self.sender.capacity());
            }
            Err(_) => self.metrics.inc_dropped(1),
        }
        result
    }
}
