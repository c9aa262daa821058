//! Media controller
//!
//! Owns at most one camera+microphone stream and at most one screen-capture
//! stream. Mute and video toggles flip `enabled` on the existing tracks;
//! only a camera track that has ended is replaced by a fresh capture.

use super::devices::{MediaConstraints, MediaDevices};
use super::track::{MediaStream, MediaTrack};
use super::MediaError;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of acquiring user media
#[derive(Debug)]
pub struct UserMedia {
    pub stream: MediaStream,
    /// Set when the full request failed and a reduced one succeeded
    pub degraded: Option<MediaError>,
}

pub struct MediaController {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    camera: Option<MediaStream>,
    screen: Option<MediaStream>,
}

impl MediaController {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            devices,
            constraints,
            camera: None,
            screen: None,
        }
    }

    /// Capture request that can run off the session loop
    ///
    /// Falls back to microphone only when camera+microphone fails.
    pub fn request_user_media(&self) -> impl Future<Output = Result<UserMedia, MediaError>> + Send + 'static {
        let devices = self.devices.clone();
        let constraints = self.constraints;
        async move {
            match devices.get_user_media(constraints).await {
                Ok(stream) => Ok(UserMedia {
                    stream,
                    degraded: None,
                }),
                Err(e) if constraints.audio && constraints.video => {
                    warn!("Camera and microphone unavailable ({}), retrying audio only", e);
                    let stream = devices.get_user_media(MediaConstraints::audio_only()).await?;
                    Ok(UserMedia {
                        stream,
                        degraded: Some(e),
                    })
                }
                Err(e) => Err(e),
            }
        }
    }

    /// Install a captured camera/microphone stream, stopping any previous one
    pub fn attach_user_media(&mut self, stream: MediaStream) {
        if let Some(previous) = self.camera.replace(stream) {
            previous.stop();
        }
        if let Some(stream) = &self.camera {
            info!("Local media attached: stream {} ({} tracks)", stream.id(), stream.tracks().len());
        }
    }

    pub fn camera_stream(&self) -> Option<&MediaStream> {
        self.camera.as_ref()
    }

    /// Live microphone track
    pub fn audio_track(&self) -> Option<MediaTrack> {
        self.camera
            .as_ref()
            .and_then(|s| s.audio_track())
            .filter(|t| !t.is_ended())
            .cloned()
    }

    /// Live camera track
    pub fn video_track(&self) -> Option<MediaTrack> {
        self.camera
            .as_ref()
            .and_then(|s| s.video_track())
            .filter(|t| !t.is_ended())
            .cloned()
    }

    /// Returns false when there is no microphone track to toggle
    pub fn set_audio_enabled(&self, enabled: bool) -> bool {
        match self.audio_track() {
            Some(track) => {
                track.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Returns false when there is no live camera track to toggle
    pub fn set_video_enabled(&self, enabled: bool) -> bool {
        match self.video_track() {
            Some(track) => {
                track.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Capture a fresh camera track after the previous one stopped
    pub async fn reacquire_video(&mut self) -> Result<MediaTrack, MediaError> {
        let mut fresh = self
            .devices
            .get_user_media(MediaConstraints::video_only())
            .await?;
        let track = fresh
            .take_track(crate::domain::participant::TrackKind::Video)
            .ok_or_else(|| MediaError::DeviceUnavailable("camera".to_string()))?;

        match self.camera.as_mut() {
            Some(stream) => {
                stream.replace_video_track(track.clone());
            }
            None => {
                let mut stream = MediaStream::new(fresh.id().to_string());
                stream.add_track(track.clone());
                self.camera = Some(stream);
            }
        }
        info!("Camera re-acquired: track {}", track.id());
        Ok(track)
    }

    /// Start screen capture and return its video track
    pub async fn start_screen_share(&mut self) -> Result<MediaTrack, MediaError> {
        if let Some(track) = self.screen_track() {
            return Ok(track);
        }
        let stream = self.devices.get_display_media().await?;
        let track = stream
            .video_track()
            .cloned()
            .ok_or_else(|| MediaError::Capture("display capture has no video track".to_string()))?;
        self.screen = Some(stream);
        info!("Screen capture started: track {}", track.id());
        Ok(track)
    }

    /// Stop screen capture; returns the track that was live, if any
    pub fn stop_screen_share(&mut self) -> Option<MediaTrack> {
        let stream = self.screen.take()?;
        let track = stream.video_track().cloned();
        stream.stop();
        info!("Screen capture stopped");
        track
    }

    pub fn screen_track(&self) -> Option<MediaTrack> {
        self.screen
            .as_ref()
            .and_then(|s| s.video_track())
            .filter(|t| !t.is_ended())
            .cloned()
    }

    pub fn is_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Release every capture source
    pub fn stop_all(&mut self) {
        if let Some(stream) = self.camera.take() {
            stream.stop();
        }
        if let Some(stream) = self.screen.take() {
            stream.stop();
        }
    }
}
