//! Capture device access
//!
//! `MediaDevices` is the seam to whatever actually captures camera,
//! microphone and screen. The headless build ships `SyntheticMediaDevices`,
//! whose tracks carry whatever samples the host writes into them.

use super::track::{MediaStream, TrackSource};
use super::MediaError;
use async_trait::async_trait;
use tracing::debug;

/// Which sources a `get_user_media` call asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn video_only() -> Self {
        Self {
            audio: false,
            video: true,
        }
    }

    fn sources(&self) -> Vec<TrackSource> {
        let mut sources = Vec::new();
        if self.audio {
            sources.push(TrackSource::Microphone);
        }
        if self.video {
            sources.push(TrackSource::Camera);
        }
        sources
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Camera and/or microphone
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;

    /// Screen capture; the returned video track ends when the user stops sharing
    async fn get_display_media(&self) -> Result<MediaStream, MediaError>;
}

/// Devices backed by host-fed tracks
#[derive(Debug, Clone)]
pub struct SyntheticMediaDevices {
    camera_available: bool,
    microphone_available: bool,
    screen_available: bool,
}

impl SyntheticMediaDevices {
    pub fn new() -> Self {
        Self {
            camera_available: true,
            microphone_available: true,
            screen_available: true,
        }
    }

    pub fn without_camera(mut self) -> Self {
        self.camera_available = false;
        self
    }

    pub fn without_microphone(mut self) -> Self {
        self.microphone_available = false;
        self
    }

    pub fn without_screen(mut self) -> Self {
        self.screen_available = false;
        self
    }
}

impl Default for SyntheticMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if constraints.video && !self.camera_available {
            return Err(MediaError::DeviceUnavailable("camera".to_string()));
        }
        if constraints.audio && !self.microphone_available {
            return Err(MediaError::DeviceUnavailable("microphone".to_string()));
        }
        let stream = MediaStream::capture("user", &constraints.sources());
        debug!("Synthetic user media {} with {} tracks", stream.id(), stream.tracks().len());
        Ok(stream)
    }

    async fn get_display_media(&self) -> Result<MediaStream, MediaError> {
        if !self.screen_available {
            return Err(MediaError::PermissionDenied("screen capture".to_string()));
        }
        Ok(MediaStream::capture("screen", &[TrackSource::Screen]))
    }
}
