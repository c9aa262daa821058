//! Media Controller - local capture streams and track-level toggles

pub mod controller;
pub mod devices;
pub mod track;

pub use controller::{MediaController, UserMedia};
pub use devices::{MediaConstraints, MediaDevices, SyntheticMediaDevices};
pub use track::{MediaStream, MediaTrack, TrackSource};

use thiserror::Error;

/// Media errors
///
/// Never fatal to a session: the affected flag stays off and a warning is surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Sample write failed: {0}")]
    Write(String),
}
