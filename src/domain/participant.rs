/// Participant domain model
use crate::domain::envelope::{ParticipantInfo, StateUpdate};
use crate::domain::shared::{Identity, ParticipantId, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-remote-participant protocol phase
///
/// `Unknown -> Announced -> Negotiating -> Connected -> Left`. `Left` is only
/// observed transiently: departed participants are removed from the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerPhase {
    Unknown,
    Announced,
    Negotiating,
    Connected,
    Left,
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Inbound track description attached to a remote participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// Inbound stream negotiated with a remote participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrackInfo>,
}

impl RemoteStream {
    /// Add or replace a track by id
    pub fn upsert(&mut self, track: RemoteTrackInfo) {
        match self.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

/// Room participant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub role: Role,
    pub is_local: bool,
    pub is_muted: bool,
    pub is_video_on: bool,
    pub is_hand_raised: bool,
    pub is_speaking: bool,
    pub is_screen_sharing: bool,
    /// Relay connectivity was lost since this participant was last heard from
    pub is_stale: bool,
    /// Known only from media or an offer, no roster metadata yet
    pub is_placeholder: bool,
    pub phase: PeerPhase,
    pub stream: Option<RemoteStream>,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// The local participant, always first in the roster
    pub fn local(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.display_name.clone(),
            role: identity.role,
            is_local: true,
            is_muted: false,
            is_video_on: false,
            is_hand_raised: false,
            is_speaking: false,
            is_screen_sharing: false,
            is_stale: false,
            is_placeholder: false,
            phase: PeerPhase::Connected,
            stream: None,
            joined_at: Utc::now(),
        }
    }

    /// Remote participant discovered through `user-joined` or `participant-info`
    pub fn announced(id: ParticipantId, info: &ParticipantInfo) -> Self {
        Self {
            id,
            name: info.name.clone(),
            role: info.role,
            is_local: false,
            is_muted: info.is_muted,
            is_video_on: info.is_video_on,
            is_hand_raised: info.is_hand_raised,
            is_speaking: false,
            is_screen_sharing: info.is_screen_sharing,
            is_stale: false,
            is_placeholder: false,
            phase: PeerPhase::Announced,
            stream: None,
            joined_at: Utc::now(),
        }
    }

    /// Placeholder for a participant known only from media or an offer
    pub fn minimal(id: ParticipantId) -> Self {
        let name = id.to_string();
        Self {
            id,
            name,
            role: Role::Attendee,
            is_local: false,
            is_muted: false,
            is_video_on: true,
            is_hand_raised: false,
            is_speaking: false,
            is_screen_sharing: false,
            is_stale: false,
            is_placeholder: true,
            phase: PeerPhase::Unknown,
            stream: None,
            joined_at: Utc::now(),
        }
    }

    /// Fill in metadata for a placeholder created before any roster message
    pub fn complete(&mut self, info: &ParticipantInfo) {
        self.name = info.name.clone();
        self.role = info.role;
        self.is_muted = info.is_muted;
        self.is_video_on = info.is_video_on;
        self.is_hand_raised = info.is_hand_raised;
        self.is_screen_sharing = info.is_screen_sharing;
        self.is_placeholder = false;
        if self.phase == PeerPhase::Unknown {
            self.phase = PeerPhase::Announced;
        }
    }

    /// Merge a partial state update
    pub fn apply(&mut self, update: &StateUpdate) {
        if let Some(muted) = update.is_muted {
            self.is_muted = muted;
        }
        if let Some(video_on) = update.is_video_on {
            self.is_video_on = video_on;
        }
        if let Some(raised) = update.is_hand_raised {
            self.is_hand_raised = raised;
        }
    }

    /// Self-description sent to other participants
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            name: self.name.clone(),
            role: self.role,
            is_muted: self.is_muted,
            is_video_on: self.is_video_on,
            is_hand_raised: self.is_hand_raised,
            is_screen_sharing: self.is_screen_sharing,
        }
    }
}
