//! Local media tracks and streams
//!
//! A `MediaTrack` is the local end of a captured source. Its RTP side is a
//! `TrackLocalStaticSample` that every peer connection shares, so muting
//! (flipping `enabled`) affects all outbound copies at once without touching
//! the senders.

use super::MediaError;
use crate::domain::participant::TrackKind;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Where a track is captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    fn label(&self) -> &'static str {
        match self {
            TrackSource::Microphone => "mic",
            TrackSource::Camera => "camera",
            TrackSource::Screen => "screen",
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

struct TrackInner {
    id: String,
    source: TrackSource,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
    rtc: Arc<TrackLocalStaticSample>,
}

/// Local captured track; clones share state
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(source: TrackSource, stream_id: &str) -> Self {
        let id = format!("{}-{}", source.label(), Uuid::new_v4());
        let codec = match source.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_owned(),
        ));
        let (ended, _) = watch::channel(false);

        Self {
            inner: Arc::new(TrackInner {
                id,
                source,
                enabled: AtomicBool::new(true),
                ended,
                rtc,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn stream_id(&self) -> &str {
        self.inner.rtc.stream_id()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the capture source; idempotent
    pub fn stop(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has ended, whoever stopped it
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// RTP-side handle handed to peer connections
    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.rtc.clone()
    }

    /// Push an encoded frame; dropped while disabled or ended
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool, MediaError> {
        if !self.is_enabled() || self.is_ended() {
            return Ok(false);
        }
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.inner
            .rtc
            .write_sample(&sample)
            .await
            .map_err(|e| MediaError::Write(e.to_string()))?;
        Ok(true)
    }

    pub fn same_as(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Group of tracks captured together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    /// Stream with freshly created tracks for the given sources
    pub fn capture(prefix: &str, sources: &[TrackSource]) -> Self {
        let mut stream = Self::new(format!("{}-{}", prefix, Uuid::new_v4()));
        for source in sources {
            let track = MediaTrack::new(*source, &stream.id);
            stream.tracks.push(track);
        }
        stream
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Swap the video track, stopping and returning the previous one
    pub fn replace_video_track(&mut self, track: MediaTrack) -> Option<MediaTrack> {
        let previous = self
            .tracks
            .iter()
            .position(|t| t.kind() == TrackKind::Video)
            .map(|index| self.tracks.remove(index));
        if let Some(old) = &previous {
            old.stop();
        }
        self.tracks.push(track);
        previous
    }

    /// Take the first track of `kind` out of the stream
    pub fn take_track(&mut self, kind: TrackKind) -> Option<MediaTrack> {
        let index = self.tracks.iter().position(|t| t.kind() == kind)?;
        Some(self.tracks.remove(index))
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_creates_requested_tracks() {
        let stream = MediaStream::capture("camera", &[TrackSource::Microphone, TrackSource::Camera]);
        assert_eq!(stream.tracks().len(), 2);
        assert_eq!(stream.audio_track().unwrap().kind(), TrackKind::Audio);
        assert_eq!(stream.video_track().unwrap().stream_id(), stream.id());
    }

    #[test]
    fn test_clones_share_enabled_flag() {
        let track = MediaTrack::new(TrackSource::Microphone, "s");
        let clone = track.clone();
        clone.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(track.same_as(&clone));
    }

    #[tokio::test]
    async fn test_ended_resolves_after_stop() {
        let track = MediaTrack::new(TrackSource::Screen, "s");
        let waiter = track.clone();
        let handle = tokio::spawn(async move { waiter.ended().await });

        track.stop();
        handle.await.unwrap();
        assert!(track.is_ended());
    }

    #[tokio::test]
    async fn test_disabled_track_drops_samples() {
        let track = MediaTrack::new(TrackSource::Camera, "s");
        track.set_enabled(false);
        let written = track
            .write_sample(Bytes::from_static(&[0u8; 4]), Duration::from_millis(33))
            .await
            .unwrap();
        assert!(!written);
    }

    #[test]
    fn test_replace_video_track_stops_previous() {
        let mut stream = MediaStream::capture("camera", &[TrackSource::Microphone, TrackSource::Camera]);
        let old = stream.video_track().unwrap().clone();
        let fresh = MediaTrack::new(TrackSource::Camera, stream.id());

        let replaced = stream.replace_video_track(fresh.clone()).unwrap();
        assert!(replaced.same_as(&old));
        assert!(old.is_ended());
        assert!(stream.video_track().unwrap().same_as(&fresh));
        assert_eq!(stream.tracks().len(), 2);
    }
}
