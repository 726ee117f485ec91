/// Error handler
///
/// Every error is logged, counted, published as a `BrokerEvent::Error` and
/// reported to the client as an `error` envelope. Critical errors then
/// force-close the connection; auth errors do so only when
/// `close_on_auth_error` is set.
use crate::broker::connection::ClientId;
use crate::broker::hub::{Broker, BrokerEvent};
use crate::broker::message::ServerMessage;
use crate::errors::{ErrorKind, HandlerError};
use crate::logger::{self, LogTag};

pub fn handle(broker: &Broker, id: &ClientId, error: HandlerError) {
    match error.kind {
        ErrorKind::Critical => logger::error(
            LogTag::Broker,
            &format!("Critical error on {}: {}", id, error.message),
        ),
        ErrorKind::Auth => logger::warning(
            LogTag::Broker,
            &format!("Auth error on {}: {}", id, error.message),
        ),
        ErrorKind::Parse | ErrorKind::Validation | ErrorKind::Generic => logger::debug(
            LogTag::Broker,
            &format!("{} on {}", error, id),
        ),
    }

    broker.metrics().error_reported();
    broker.emit(BrokerEvent::Error {
        client_id: id.clone(),
        kind: error.kind,
        message: error.message.clone(),
    });
    broker.send_to_client(id, ServerMessage::error(&error));

    if should_close(broker, &error) {
        broker.force_close(id);
    }
}

fn should_close(broker: &Broker, error: &HandlerError) -> bool {
    match error.kind {
        ErrorKind::Critical => true,
        ErrorKind::Auth => broker.settings().close_on_auth_error,
        _ => false,
    }
}
