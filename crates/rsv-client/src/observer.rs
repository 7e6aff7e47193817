//! Delivery of session events to the application.
//!
//! The receive task never calls back into application code directly beyond
//! [`SessionObserver::on_event`], which must not block. [`ChannelObserver`]
//! forwards events into an mpsc channel for consumers that want to `await`
//! them.

use std::fmt;

use rsv_proto::Envelope;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Connection state changes reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// TCP connection established
    Connected,
    /// Server key received and imported
    KeyExchangeCompleted,
    /// Closed by `disconnect`
    Disconnected,
    /// Closed by the server or a transport failure
    ConnectionLost,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::KeyExchangeCompleted => "key exchange completed",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::ConnectionLost => "connection lost",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A message from the server. `signature_valid` is true only when the
    /// envelope carried a signature that verifies against the server key.
    Message {
        envelope: Envelope,
        signature_valid: bool,
    },
    Error(String),
    Status(ConnectionStatus),
}

pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: ClientEvent);
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: ClientEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Message {
                envelope,
                signature_valid,
            } => info!(
                msg_type = %envelope.msg_type,
                action = %envelope.action,
                signature_valid,
                "message: {}",
                envelope.data
            ),
            ClientEvent::Error(message) => warn!("client error: {}", message),
            ClientEvent::Status(status) => info!(%status, "status changed"),
        }
    }
}
