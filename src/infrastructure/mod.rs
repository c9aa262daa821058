//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Media capture and local tracks
//! - Peer connections (WebRTC)
//! - Signaling relay transports
//! - Metrics

pub mod media;
pub mod peer;
pub mod signaling;
pub mod telemetry;
