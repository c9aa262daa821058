//! Peer connections
//!
//! One connection per remote participant. Backend callbacks (local ICE
//! candidates, inbound tracks, connection-state changes) are never handled
//! in place: they are forwarded as `PeerEvent`s onto the session's single
//! execution context, tagged with the connection generation that produced
//! them.

pub mod manager;
pub mod webrtc;

pub use manager::{Outbound, PeerConnectionManager};
pub use self::webrtc::{IceServer, WebRtcPeerFactory};

use crate::domain::envelope::{IceCandidate, SessionDescription};
use crate::domain::participant::TrackKind;
use crate::domain::shared::ParticipantId;
use crate::infrastructure::media::MediaTrack;
use ::webrtc::track::track_remote::TrackRemote;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Peer connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Failed to create peer connection: {0}")]
    Create(String),

    #[error("SDP negotiation failed: {0}")]
    Sdp(String),

    #[error("ICE candidate rejected: {0}")]
    Ice(String),

    #[error("Track operation failed: {0}")]
    Track(String),

    #[error("Refusing to connect to self ({0})")]
    SelfConnection(String),

    #[error("Peer connection closed")]
    Closed,
}

/// Generation of a connection; a participant that reconnects gets a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Aggregate connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// The connection has left a connected ICE state
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Inbound track announced by the backend
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// RTP reader for backends that carry real media
    pub reader: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Backend callback, delivered to the session loop
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate {
        peer: ParticipantId,
        connection: ConnectionId,
        candidate: IceCandidate,
    },
    RemoteTrack {
        peer: ParticipantId,
        connection: ConnectionId,
        track: RemoteTrack,
    },
    StateChanged {
        peer: ParticipantId,
        connection: ConnectionId,
        state: ConnectionState,
    },
}

impl PeerEvent {
    pub fn peer(&self) -> &ParticipantId {
        match self {
            PeerEvent::LocalCandidate { peer, .. }
            | PeerEvent::RemoteTrack { peer, .. }
            | PeerEvent::StateChanged { peer, .. } => peer,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        match self {
            PeerEvent::LocalCandidate { connection, .. }
            | PeerEvent::RemoteTrack { connection, .. }
            | PeerEvent::StateChanged { connection, .. } => *connection,
        }
    }
}

/// Everything a factory needs to wire a new connection
#[derive(Debug, Clone)]
pub struct PeerContext {
    pub local: ParticipantId,
    pub remote: ParticipantId,
    pub connection: ConnectionId,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

/// A single peer connection
///
/// `create_offer`/`create_answer` also install the result as the local
/// description.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Start sending a local track; a second track of the same kind
    /// replaces the first on the existing sender
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError>;

    /// Swap the outbound video track without renegotiation
    ///
    /// Returns `false` when the connection has no video sender yet.
    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<bool, PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError>;

    /// Discard a pending local offer
    async fn rollback(&self) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, context: PeerContext) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
