//! Broker event handlers
//!
//! - `message`: one function per inbound message type
//! - `error`: reports a `HandlerError` and applies its close policy
//! - `disconnect`: detaches a closed connection from every channel

pub mod disconnect;
pub mod error;
pub mod message;
