//! Signaling Transport - thin wrapper over a group-messaging relay
//!
//! Responsible only for connecting, joining the room group and moving
//! opaque `SignalEnvelope`s. Delivery is fire-and-forget; reconnection is
//! left to the caller, which observes `TransportEvent::Disconnected`.

pub mod memory;
pub mod websocket;

pub use memory::{MemoryRelay, MemoryTransport};
pub use websocket::{WebSocketRelay, WebSocketTransport};

use crate::domain::envelope::SignalEnvelope;
use crate::domain::shared::{ParticipantId, RoomId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Relay connection failed: {0}")]
    Connect(String),

    #[error("Joining group {group} failed: {reason}")]
    JoinGroup { group: String, reason: String },

    #[error("Envelope encoding failed: {0}")]
    Encode(String),

    #[error("Relay connection closed")]
    Closed,

    #[error("Token request failed: {0}")]
    Token(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Something the relay delivered
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Relay acknowledged the connection
    Connected { connection_id: Option<String> },
    /// Decoded envelope from the room group
    Envelope(SignalEnvelope),
    /// Payload that failed to decode; logged and dropped by the session
    Malformed(String),
    /// The relay connection is gone
    Disconnected { reason: Option<String> },
}

/// Connection credential issued for one participant and room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredential {
    /// Client URL, usually already carrying the access token as a query parameter
    pub url: String,
    /// Sent as a bearer token when present
    pub access_token: Option<String>,
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Subscribe to the room group
    async fn join_group(&self, room: &RoomId) -> Result<(), TransportError>;

    /// Publish an envelope to the room group without waiting for delivery
    fn send(&self, room: &RoomId, envelope: &SignalEnvelope) -> Result<(), TransportError>;

    /// Close the relay connection
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

/// Live relay connection
pub struct RelayConnection {
    pub transport: Arc<dyn SignalingTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, credential: &RelayCredential) -> Result<RelayConnection, TransportError>;
}

/// Source of relay credentials (the token-issuing collaborator)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn issue(
        &self,
        room: &RoomId,
        participant: &ParticipantId,
    ) -> Result<RelayCredential, TransportError>;
}

/// Pre-issued credential from configuration
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: RelayCredential,
}

impl StaticTokenProvider {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            credential: RelayCredential {
                url: url.into(),
                access_token,
            },
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn issue(
        &self,
        _room: &RoomId,
        _participant: &ParticipantId,
    ) -> Result<RelayCredential, TransportError> {
        if self.credential.url.is_empty() {
            return Err(TransportError::Token("relay url is not configured".to_string()));
        }
        Ok(self.credential.clone())
    }
}
