//! Application-level errors

use crate::domain::DomainError;
use crate::infrastructure::media::MediaError;
use crate::infrastructure::peer::PeerError;
use crate::infrastructure::signaling::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Session already left the room")]
    AlreadyLeft,

    #[error("Session has not joined a relay yet")]
    NotJoined,

    #[error("Session closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for SessionError {
    fn from(e: config::ConfigError) -> Self {
        SessionError::Config(e.to_string())
    }
}
