/// Connection broker
///
/// The broker owns every connection and the channel table behind one lock.
/// All operations are synchronous and never hold the lock across an await;
/// outbound delivery goes through each connection's bounded queue with
/// `try_send`, so a slow peer never blocks a fan-out.
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::auth::{Authenticator, StaticTokenAuthenticator};
use super::channels::ChannelTable;
use super::connection::{ClientId, Connection, ConnectionState, Outbound};
use super::handlers;
use super::message::{parse_client_message, ServerMessage};
use super::metrics::{HubMetrics, HubMetricsSnapshot};
use crate::config::BrokerConfig;
use crate::errors::{ErrorKind, HandlerError};
use crate::logger::{self, LogTag};

const WELCOME_MESSAGE: &str = "Connected to Nexa realtime server";
const EVENT_BUFFER: usize = 256;

// ============================================================================
// SETTINGS / EVENTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub send_buffer_size: usize,
    pub max_channel_name_length: usize,
    pub require_auth: bool,
    pub close_on_auth_error: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

impl BrokerSettings {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs),
            send_buffer_size: config.send_buffer_size.max(1),
            max_channel_name_length: config.max_channel_name_length,
            require_auth: config.require_auth,
            close_on_auth_error: config.close_on_auth_error,
        }
    }
}

/// Lifecycle notifications for embedders
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected {
        client_id: ClientId,
    },
    Disconnected {
        client_id: ClientId,
        channels: Vec<String>,
    },
    Error {
        client_id: ClientId,
        kind: ErrorKind,
        message: String,
    },
    ChannelCreated {
        channel: String,
    },
    ChannelRemoved {
        channel: String,
    },
}

/// Result of one heartbeat sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub connections: usize,
    pub channels: usize,
    pub channel_sizes: HashMap<String, usize>,
    pub hub: HubMetricsSnapshot,
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct BrokerState {
    pub connections: HashMap<ClientId, Connection>,
    pub channels: ChannelTable,
}

// ============================================================================
// BROKER
// ============================================================================

pub struct Broker {
    settings: BrokerSettings,
    pub(crate) state: RwLock<BrokerState>,
    metrics: Arc<HubMetrics>,
    events: broadcast::Sender<BrokerEvent>,
    authenticator: Arc<dyn Authenticator>,
}

impl Broker {
    /// Broker without accepted tokens
    pub fn new(settings: BrokerSettings) -> Arc<Self> {
        Self::with_authenticator(settings, Arc::new(StaticTokenAuthenticator::default()))
    }

    pub fn with_authenticator(
        settings: BrokerSettings,
        authenticator: Arc<dyn Authenticator>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            settings,
            state: RwLock::new(BrokerState::default()),
            metrics: HubMetrics::new(),
            events,
            authenticator,
        })
    }

    /// Build from `[broker]`, using its token table
    pub fn from_config(config: &BrokerConfig) -> Arc<Self> {
        Self::with_authenticator(
            BrokerSettings::from_config(config),
            Arc::new(StaticTokenAuthenticator::new(config.auth_tokens.clone())),
        )
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub(crate) fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn metrics(&self) -> Arc<HubMetrics> {
        self.metrics.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: BrokerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Register an accepted connection and greet it
    pub fn on_open(&self, remote_addr: Option<SocketAddr>) -> (ClientId, mpsc::Receiver<Outbound>) {
        let id = ClientId::generate();
        let (tx, rx) = mpsc::channel(self.settings.send_buffer_size);

        {
            let mut state = self.state.write();
            let mut connection = Connection::new(id.clone(), remote_addr, tx);
            let welcome = ServerMessage::Welcome {
                client_id: id.clone(),
                message: WELCOME_MESSAGE.to_string(),
            };
            self.deliver(&connection, welcome);
            connection.state = ConnectionState::Open;
            state.connections.insert(id.clone(), connection);
        }

        self.metrics.connection_opened();
        logger::info(
            LogTag::Broker,
            &format!(
                "Connection {} opened from {} (active={})",
                id,
                remote_addr
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                self.connection_count()
            ),
        );
        self.emit(BrokerEvent::Connected {
            client_id: id.clone(),
        });

        (id, rx)
    }

    /// Handle one inbound text frame
    ///
    /// Errors are reported to the client through the error handler and
    /// never propagate; a panic in dispatch becomes a critical error.
    pub fn on_message(&self, id: &ClientId, raw: &str) {
        {
            let mut state = self.state.write();
            let connection = match state.connections.get_mut(id) {
                Some(connection) if connection.is_open() => connection,
                Some(_) => {
                    logger::debug(
                        LogTag::Broker,
                        &format!("Ignoring message from {} (not open)", id),
                    );
                    return;
                }
                None => {
                    logger::debug(
                        LogTag::Broker,
                        &format!("Ignoring message from unknown connection {}", id),
                    );
                    return;
                }
            };
            connection.record_activity();
            connection.metrics.inc_received();
        }
        self.metrics.message_received();
        logger::verbose(LogTag::Broker, &format!("{} frame: {}", id, raw));

        let message = match parse_client_message(raw) {
            Ok(message) => message,
            Err(error) => {
                handlers::error::handle(self, id, error);
                return;
            }
        };

        logger::debug(
            LogTag::Broker,
            &format!("{} -> {}", id, message.type_name()),
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handlers::message::dispatch(self, id, message)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => handlers::error::handle(self, id, error),
            Err(_) => handlers::error::handle(
                self,
                id,
                HandlerError::critical("Internal error while handling message"),
            ),
        }
    }

    /// Handle one inbound binary frame; it must carry UTF-8 JSON
    pub fn on_binary(&self, id: &ClientId, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.on_message(id, text),
            Err(e) => {
                if !self.is_open(id) {
                    return;
                }
                self.record_activity(id);
                self.metrics.message_received();
                logger::debug(
                    LogTag::Broker,
                    &format!("{} sent a non UTF-8 frame: {}", id, e),
                );
                handlers::error::handle(self, id, HandlerError::parse());
            }
        }
    }

    /// Refresh liveness for transport-level frames (ping/pong)
    pub fn record_activity(&self, id: &ClientId) {
        if let Some(connection) = self.state.write().connections.get_mut(id) {
            connection.record_activity();
        }
    }

    /// Detach and purge a connection; idempotent
    pub fn on_close(&self, id: &ClientId) -> bool {
        handlers::disconnect::handle(self, id)
    }

    /// Transport-level failure: report and force-close
    pub fn on_error(&self, id: &ClientId, error: &str) {
        logger::warning(
            LogTag::Broker,
            &format!("Connection {} error: {}", id, error),
        );
        self.metrics.error_reported();
        self.emit(BrokerEvent::Error {
            client_id: id.clone(),
            kind: ErrorKind::Generic,
            message: error.to_string(),
        });
        self.force_close(id);
    }

    /// Queue a close frame, then purge
    pub fn force_close(&self, id: &ClientId) {
        {
            let mut state = self.state.write();
            if let Some(connection) = state.connections.get_mut(id) {
                connection.state = ConnectionState::Closing;
                let _ = connection.enqueue(Outbound::Close);
            }
        }
        self.on_close(id);
    }

    // ========================================================================
    // DELIVERY
    // ========================================================================

    /// Enqueue on one connection; failures are logged and counted
    pub(crate) fn deliver(&self, connection: &Connection, message: ServerMessage) -> bool {
        let type_name = message.type_name();
        match connection.enqueue(Outbound::Message(message)) {
            Ok(()) => {
                self.metrics.message_sent();
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.message_dropped(1);
                logger::warning(
                    LogTag::Broker,
                    &format!("Dropped {} for {} (queue full)", type_name, connection.id),
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.message_dropped(1);
                logger::debug(
                    LogTag::Broker,
                    &format!("Dropped {} for {} (queue closed)", type_name, connection.id),
                );
                false
            }
        }
    }

    /// Deliver to each listed member except `exclude`; returns deliveries
    pub(crate) fn fan_out(
        &self,
        state: &BrokerState,
        members: &[ClientId],
        message: &ServerMessage,
        exclude: Option<&ClientId>,
    ) -> usize {
        members
            .iter()
            .filter(|member| Some(*member) != exclude)
            .filter_map(|member| state.connections.get(member))
            .filter(|connection| self.deliver(connection, message.clone()))
            .count()
    }

    /// Best-effort fan-out to a channel
    pub fn broadcast_to_channel(
        &self,
        channel: &str,
        message: ServerMessage,
        exclude: Option<&ClientId>,
    ) -> usize {
        let state = self.state.read();
        let members = state.channels.members(channel);
        let delivered = self.fan_out(&state, &members, &message, exclude);
        logger::debug(
            LogTag::Channels,
            &format!(
                "{} to '{}': {}/{} delivered",
                message.type_name(),
                channel,
                delivered,
                members.len()
            ),
        );
        delivered
    }

    pub fn send_to_client(&self, id: &ClientId, message: ServerMessage) -> bool {
        let state = self.state.read();
        match state.connections.get(id) {
            Some(connection) => self.deliver(connection, message),
            None => false,
        }
    }

    /// Deliver to every open connection except `exclude`
    pub fn broadcast_all(&self, message: ServerMessage, exclude: Option<&ClientId>) -> usize {
        let state = self.state.read();
        state
            .connections
            .values()
            .filter(|c| c.is_open() && Some(&c.id) != exclude)
            .filter(|c| self.deliver(c, message.clone()))
            .count()
    }

    // ========================================================================
    // HEARTBEAT
    // ========================================================================

    /// Close connections with an unanswered ping, then ping the rest
    pub fn heartbeat_sweep(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        let mut stale = Vec::new();

        {
            let mut state = self.state.write();
            for connection in state.connections.values_mut() {
                if !connection.is_open() {
                    continue;
                }
                match connection.ping_sent_at {
                    Some(sent) if sent.elapsed() >= self.settings.pong_timeout => {
                        stale.push(connection.id.clone());
                    }
                    Some(_) => {}
                    None => match connection.enqueue(Outbound::Ping) {
                        Ok(()) => {
                            connection.ping_sent_at = Some(Instant::now());
                            report.pinged += 1;
                        }
                        // a peer that stopped reading still gets its pong deadline
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            connection.ping_sent_at = Some(Instant::now());
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            stale.push(connection.id.clone());
                        }
                    },
                }
            }
        }

        for id in stale {
            logger::warning(
                LogTag::Heartbeat,
                &format!("Connection {} missed its pong, closing", id),
            );
            self.metrics.heartbeat_timeout();
            self.force_close(&id);
            report.closed += 1;
        }

        if report.pinged > 0 || report.closed > 0 {
            logger::debug(
                LogTag::Heartbeat,
                &format!("Sweep: pinged={}, closed={}", report.pinged, report.closed),
            );
        }
        report
    }

    /// Run `heartbeat_sweep` every `heartbeat_interval` until `shutdown`
    pub fn spawn_heartbeat(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            // one waiter for the task's lifetime; a signal sent during a sweep is kept
            let stop = shutdown.notified();
            tokio::pin!(stop);
            stop.as_mut().enable();

            let mut interval = tokio::time::interval(broker.settings.heartbeat_interval);
            // first tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    _ = interval.tick() => {
                        broker.heartbeat_sweep();
                    }
                }
            }
            logger::info(LogTag::Heartbeat, "Heartbeat stopped");
        })
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.state.read().channels.len()
    }

    pub fn channel_members(&self, channel: &str) -> Vec<ClientId> {
        self.state.read().channels.members(channel)
    }

    pub fn channels_of(&self, id: &ClientId) -> Option<Vec<String>> {
        self.state.read().connections.get(id).map(|c| {
            let mut channels: Vec<String> = c.channels.iter().cloned().collect();
            channels.sort();
            channels
        })
    }

    /// `None` once the connection is purged
    pub fn connection_state(&self, id: &ClientId) -> Option<ConnectionState> {
        self.state.read().connections.get(id).map(|c| c.state)
    }

    fn is_open(&self, id: &ClientId) -> bool {
        self.state
            .read()
            .connections
            .get(id)
            .map(|c| c.is_open())
            .unwrap_or(false)
    }

    pub fn is_authenticated(&self, id: &ClientId) -> bool {
        self.state
            .read()
            .connections
            .get(id)
            .map(|c| c.auth.is_authenticated())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> BrokerStats {
        let state = self.state.read();
        BrokerStats {
            connections: state.connections.len(),
            channels: state.channels.len(),
            channel_sizes: state.channels.sizes(),
            hub: self.metrics.snapshot(),
        }
    }
}
