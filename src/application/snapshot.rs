//! Observable session state

use crate::domain::chat::ChatMessage;
use crate::domain::participant::Participant;
use crate::domain::shared::{ParticipantId, RoomId};
use serde::Serialize;

/// Relay connectivity as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub local_id: ParticipantId,
    pub room_id: RoomId,
    /// Local first, then hosts, then everyone else
    pub participants: Vec<Participant>,
    pub chat: Vec<ChatMessage>,
    pub is_muted: bool,
    pub is_video_on: bool,
    pub is_hand_raised: bool,
    pub is_screen_sharing: bool,
    pub relay: RelayState,
    /// Last media acquisition problem, shown as a non-fatal warning
    pub media_warning: Option<String>,
}

impl SessionSnapshot {
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn remote_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| !p.is_local)
            .map(|p| p.id.clone())
            .collect()
    }
}
