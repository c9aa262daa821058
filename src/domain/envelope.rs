//! Signaling envelope
//!
//! Every control-plane message exchanged through the relay is a
//! `SignalEnvelope`. On the wire it is a flat JSON object:
//!
//! ```json
//! {"type": "offer", "from": "alice", "to": "bob", "payload": {...}, "roomId": "r1"}
//! ```
//!
//! `to` absent means broadcast. There are no sequence numbers, so every
//! consumer must tolerate duplicates and reordering.

use crate::domain::shared::{DomainError, ParticipantId, Result, Role, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    UserJoined,
    UserLeft,
    UserStateUpdate,
    Offer,
    Answer,
    IceCandidate,
    ChatMessage,
    ScreenShareStart,
    ScreenShareStop,
    RequestParticipantList,
    ParticipantInfo,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::UserJoined => "user-joined",
            EnvelopeType::UserLeft => "user-left",
            EnvelopeType::UserStateUpdate => "user-state-update",
            EnvelopeType::Offer => "offer",
            EnvelopeType::Answer => "answer",
            EnvelopeType::IceCandidate => "ice-candidate",
            EnvelopeType::ChatMessage => "chat-message",
            EnvelopeType::ScreenShareStart => "screen-share-start",
            EnvelopeType::ScreenShareStop => "screen-share-stop",
            EnvelopeType::RequestParticipantList => "request-participant-list",
            EnvelopeType::ParticipantInfo => "participant-info",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let kind = match s {
            "user-joined" => EnvelopeType::UserJoined,
            "user-left" => EnvelopeType::UserLeft,
            "user-state-update" => EnvelopeType::UserStateUpdate,
            "offer" => EnvelopeType::Offer,
            "answer" => EnvelopeType::Answer,
            "ice-candidate" => EnvelopeType::IceCandidate,
            "chat-message" => EnvelopeType::ChatMessage,
            "screen-share-start" => EnvelopeType::ScreenShareStart,
            "screen-share-stop" => EnvelopeType::ScreenShareStop,
            "request-participant-list" => EnvelopeType::RequestParticipantList,
            "participant-info" => EnvelopeType::ParticipantInfo,
            other => return Err(DomainError::UnknownEnvelopeType(other.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description as exchanged in `offer`/`answer` payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Self-description carried by `user-joined`, `participant-info` and
/// (optionally) `request-participant-list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_video_on: bool,
    #[serde(default)]
    pub is_hand_raised: bool,
    #[serde(default)]
    pub is_screen_sharing: bool,
}

/// Partial state update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video_on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hand_raised: Option<bool>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.is_muted.is_none() && self.is_video_on.is_none() && self.is_hand_raised.is_none()
    }
}

/// Chat payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Milliseconds since the Unix epoch, sender clock
    #[serde(default)]
    pub timestamp: i64,
}

/// Typed envelope body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    UserJoined(ParticipantInfo),
    UserLeft,
    UserStateUpdate(StateUpdate),
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    ChatMessage(ChatPayload),
    ScreenShareStart,
    ScreenShareStop,
    RequestParticipantList(Option<ParticipantInfo>),
    ParticipantInfo(ParticipantInfo),
}

impl SignalMessage {
    pub fn kind(&self) -> EnvelopeType {
        match self {
            SignalMessage::UserJoined(_) => EnvelopeType::UserJoined,
            SignalMessage::UserLeft => EnvelopeType::UserLeft,
            SignalMessage::UserStateUpdate(_) => EnvelopeType::UserStateUpdate,
            SignalMessage::Offer(_) => EnvelopeType::Offer,
            SignalMessage::Answer(_) => EnvelopeType::Answer,
            SignalMessage::IceCandidate(_) => EnvelopeType::IceCandidate,
            SignalMessage::ChatMessage(_) => EnvelopeType::ChatMessage,
            SignalMessage::ScreenShareStart => EnvelopeType::ScreenShareStart,
            SignalMessage::ScreenShareStop => EnvelopeType::ScreenShareStop,
            SignalMessage::RequestParticipantList(_) => EnvelopeType::RequestParticipantList,
            SignalMessage::ParticipantInfo(_) => EnvelopeType::ParticipantInfo,
        }
    }

    /// Offer, answer or ICE candidate
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            SignalMessage::Offer(_) | SignalMessage::Answer(_) | SignalMessage::IceCandidate(_)
        )
    }

    /// Directed-only messages are meaningless as broadcasts
    pub fn requires_recipient(&self) -> bool {
        self.is_negotiation()
    }

    fn decode(kind: EnvelopeType, payload: Option<Value>) -> Result<Self> {
        let message = match kind {
            EnvelopeType::UserJoined => SignalMessage::UserJoined(required(kind, payload)?),
            EnvelopeType::UserLeft => SignalMessage::UserLeft,
            EnvelopeType::UserStateUpdate => {
                SignalMessage::UserStateUpdate(required(kind, payload)?)
            }
            EnvelopeType::Offer => SignalMessage::Offer(description(kind, payload, SdpKind::Offer)?),
            EnvelopeType::Answer => {
                SignalMessage::Answer(description(kind, payload, SdpKind::Answer)?)
            }
            EnvelopeType::IceCandidate => SignalMessage::IceCandidate(required(kind, payload)?),
            EnvelopeType::ChatMessage => SignalMessage::ChatMessage(required(kind, payload)?),
            EnvelopeType::ScreenShareStart => SignalMessage::ScreenShareStart,
            EnvelopeType::ScreenShareStop => SignalMessage::ScreenShareStop,
            EnvelopeType::RequestParticipantList => {
                SignalMessage::RequestParticipantList(optional(kind, payload)?)
            }
            EnvelopeType::ParticipantInfo => {
                SignalMessage::ParticipantInfo(required(kind, payload)?)
            }
        };
        Ok(message)
    }

    fn encode(&self) -> Option<Value> {
        let value = match self {
            SignalMessage::UserJoined(info) | SignalMessage::ParticipantInfo(info) => {
                serde_json::to_value(info)
            }
            SignalMessage::UserStateUpdate(update) => serde_json::to_value(update),
            SignalMessage::Offer(desc) | SignalMessage::Answer(desc) => serde_json::to_value(desc),
            SignalMessage::IceCandidate(candidate) => serde_json::to_value(candidate),
            SignalMessage::ChatMessage(chat) => serde_json::to_value(chat),
            SignalMessage::RequestParticipantList(Some(info)) => serde_json::to_value(info),
            SignalMessage::UserLeft
            | SignalMessage::ScreenShareStart
            | SignalMessage::ScreenShareStop
            | SignalMessage::RequestParticipantList(None) => return None,
        };
        // Payload types are plain structs of strings/bools/ints; serialization cannot fail.
        value.ok()
    }
}

fn required<T: DeserializeOwned>(kind: EnvelopeType, payload: Option<Value>) -> Result<T> {
    let value = payload.ok_or_else(|| DomainError::MissingPayload(kind.to_string()))?;
    serde_json::from_value(value).map_err(|e| DomainError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

fn optional<T: DeserializeOwned>(kind: EnvelopeType, payload: Option<Value>) -> Result<Option<T>> {
    match payload {
        None => Ok(None),
        Some(value) => required(kind, Some(value)).map(Some),
    }
}

fn description(
    kind: EnvelopeType,
    payload: Option<Value>,
    expected: SdpKind,
) -> Result<SessionDescription> {
    let desc: SessionDescription = required(kind, payload)?;
    if desc.kind != expected {
        return Err(DomainError::InvalidPayload {
            kind: kind.to_string(),
            reason: format!("description type {:?} in {} envelope", desc.kind, kind),
        });
    }
    Ok(desc)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    from: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    room_id: RoomId,
}

/// Signaling envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub struct SignalEnvelope {
    pub from: ParticipantId,
    pub to: Option<ParticipantId>,
    pub room_id: RoomId,
    pub message: SignalMessage,
}

impl SignalEnvelope {
    /// Envelope for the whole room
    pub fn broadcast(from: ParticipantId, room_id: RoomId, message: SignalMessage) -> Self {
        Self {
            from,
            to: None,
            room_id,
            message,
        }
    }

    /// Envelope only the addressed participant acts on
    pub fn directed(
        from: ParticipantId,
        to: ParticipantId,
        room_id: RoomId,
        message: SignalMessage,
    ) -> Self {
        Self {
            from,
            to: Some(to),
            room_id,
            message,
        }
    }

    pub fn kind(&self) -> EnvelopeType {
        self.message.kind()
    }

    /// Whether `participant` should act on this envelope
    pub fn is_for(&self, participant: &ParticipantId) -> bool {
        if &self.from == participant {
            return false;
        }
        match &self.to {
            Some(to) => to == participant,
            None => true,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

impl TryFrom<RawEnvelope> for SignalEnvelope {
    type Error = DomainError;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        let kind = EnvelopeType::parse(&raw.kind)?;
        let message = SignalMessage::decode(kind, raw.payload)?;
        if message.requires_recipient() && raw.to.is_none() {
            return Err(DomainError::ValidationError(format!(
                "{} envelope from {} has no recipient",
                kind, raw.from
            )));
        }
        if raw.to.as_ref() == Some(&raw.from) {
            return Err(DomainError::SelfReference(raw.from.to_string()));
        }
        Ok(Self {
            from: raw.from,
            to: raw.to,
            room_id: raw.room_id,
            message,
        })
    }
}

impl From<SignalEnvelope> for RawEnvelope {
    fn from(envelope: SignalEnvelope) -> Self {
        RawEnvelope {
            kind: envelope.message.kind().as_str().to_string(),
            payload: envelope.message.encode(),
            from: envelope.from,
            to: envelope.to,
            room_id: envelope.room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(name: &str) -> ParticipantInfo {
        ParticipantInfo {
            name: name.to_string(),
            role: Role::Host,
            is_muted: true,
            is_video_on: false,
            is_hand_raised: false,
            is_screen_sharing: false,
        }
    }

    #[test]
    fn test_broadcast_wire_shape() {
        let envelope = SignalEnvelope::broadcast(
            "alice".into(),
            "r1".into(),
            SignalMessage::UserJoined(info("Alice")),
        );
        let value = envelope.to_json().unwrap();

        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["from"], "alice");
        assert_eq!(value["roomId"], "r1");
        assert!(value.get("to").is_none());
        assert_eq!(value["payload"]["name"], "Alice");
        assert_eq!(value["payload"]["role"], "Host");
        assert_eq!(value["payload"]["isMuted"], true);
    }

    #[test]
    fn test_decode_browser_offer() {
        let value = json!({
            "type": "offer",
            "from": "alice",
            "to": "bob",
            "roomId": "r1",
            "payload": {"type": "offer", "sdp": "v=0\r\n"}
        });
        let envelope = SignalEnvelope::from_json(value).unwrap();

        assert_eq!(envelope.to, Some(ParticipantId::from("bob")));
        assert_eq!(
            envelope.message,
            SignalMessage::Offer(SessionDescription::offer("v=0\r\n"))
        );
    }

    #[test]
    fn test_decode_ice_candidate_field_names() {
        let value = json!({
            "type": "ice-candidate",
            "from": "alice",
            "to": "bob",
            "roomId": "r1",
            "payload": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        });
        let envelope = SignalEnvelope::from_json(value).unwrap();

        match envelope.message {
            SignalMessage::IceCandidate(c) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert!(c.username_fragment.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unit_messages_have_no_payload() {
        let envelope = SignalEnvelope::broadcast("alice".into(), "r1".into(), SignalMessage::UserLeft);
        let value = envelope.to_json().unwrap();
        assert!(value.get("payload").is_none());

        let back = SignalEnvelope::from_json(value).unwrap();
        assert_eq!(back.message, SignalMessage::UserLeft);
    }

    #[test]
    fn test_request_participant_list_payload_is_optional() {
        let bare = json!({"type": "request-participant-list", "from": "bob", "roomId": "r1"});
        let envelope = SignalEnvelope::from_json(bare).unwrap();
        assert_eq!(envelope.message, SignalMessage::RequestParticipantList(None));

        let with_info = json!({
            "type": "request-participant-list",
            "from": "bob",
            "roomId": "r1",
            "payload": {"name": "Bob"}
        });
        let envelope = SignalEnvelope::from_json(with_info).unwrap();
        match envelope.message {
            SignalMessage::RequestParticipantList(Some(info)) => {
                assert_eq!(info.name, "Bob");
                assert_eq!(info.role, Role::Attendee);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_state_update_omits_absent_fields() {
        let update = StateUpdate {
            is_muted: Some(true),
            ..Default::default()
        };
        let envelope = SignalEnvelope::broadcast(
            "alice".into(),
            "r1".into(),
            SignalMessage::UserStateUpdate(update),
        );
        let value = envelope.to_json().unwrap();
        assert_eq!(value["payload"], json!({"isMuted": true}));
    }

    #[test]
    fn test_malformed_envelopes_are_rejected() {
        let unknown = json!({"type": "kick", "from": "alice", "roomId": "r1"});
        assert!(SignalEnvelope::from_json(unknown).is_err());

        let missing = json!({"type": "user-state-update", "from": "alice", "roomId": "r1"});
        assert!(SignalEnvelope::from_json(missing).is_err());

        let broadcast_offer = json!({
            "type": "offer",
            "from": "alice",
            "roomId": "r1",
            "payload": {"type": "offer", "sdp": "v=0"}
        });
        assert!(SignalEnvelope::from_json(broadcast_offer).is_err());

        let mismatched = json!({
            "type": "answer",
            "from": "alice",
            "to": "bob",
            "roomId": "r1",
            "payload": {"type": "offer", "sdp": "v=0"}
        });
        assert!(SignalEnvelope::from_json(mismatched).is_err());

        let to_self = json!({"type": "user-left", "from": "alice", "to": "alice", "roomId": "r1"});
        assert!(SignalEnvelope::from_json(to_self).is_err());
    }

    #[test]
    fn test_is_for_filters_own_and_foreign_envelopes() {
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        let carol = ParticipantId::from("carol");

        let broadcast = SignalEnvelope::broadcast(alice.clone(), "r1".into(), SignalMessage::UserLeft);
        assert!(!broadcast.is_for(&alice));
        assert!(broadcast.is_for(&bob));

        let directed = SignalEnvelope::directed(
            alice.clone(),
            bob.clone(),
            "r1".into(),
            SignalMessage::ScreenShareStop,
        );
        assert!(directed.is_for(&bob));
        assert!(!directed.is_for(&carol));
    }
}
