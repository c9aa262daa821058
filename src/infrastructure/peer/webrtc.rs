//! webrtc-rs backed peer connections

use super::{
    ConnectionState, PeerConnection, PeerConnectionFactory, PeerContext, PeerError, PeerEvent,
    RemoteTrack,
};
use crate::domain::envelope::{IceCandidate, SdpKind, SessionDescription};
use crate::domain::participant::TrackKind;
use crate::infrastructure::media::MediaTrack;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Builds peer connections sharing one media engine configuration
pub struct WebRtcPeerFactory {
    api: API,
    configuration: RTCConfiguration,
}

impl WebRtcPeerFactory {
    pub fn new(ice_servers: &[IceServer]) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Create(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerError::Create(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let configuration = RTCConfiguration {
            ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        Ok(Self { api, configuration })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(&self, context: PeerContext) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration.clone())
                .await
                .map_err(|e| PeerError::Create(e.to_string()))?,
        );

        register_handlers(&pc, &context);
        info!(
            "Created WebRTC peer connection {} for {}",
            context.connection, context.remote
        );

        Ok(Arc::new(WebRtcPeerConnection {
            pc,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

/// Forward backend callbacks to the session loop as tagged events
fn register_handlers(pc: &Arc<RTCPeerConnection>, context: &PeerContext) {
    let peer = context.remote.clone();
    let connection = context.connection;
    let events = context.events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let peer = peer.clone();
        let events = events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(PeerEvent::LocalCandidate {
                        peer,
                        connection,
                        candidate: IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        },
                    });
                }
                Err(e) => warn!("Failed to serialize local ICE candidate for {}: {}", peer, e),
            }
        })
    }));

    let peer = context.remote.clone();
    let events = context.events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let peer = peer.clone();
        let events = events.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                _ => {
                    debug!("Ignoring track of unspecified kind from {}", peer);
                    return;
                }
            };
            let _ = events.send(PeerEvent::RemoteTrack {
                peer,
                connection,
                track: RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    reader: Some(track),
                },
            });
        })
    }));

    let peer = context.remote.clone();
    let events = context.events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let peer = peer.clone();
        let events = events.clone();
        Box::pin(async move {
            let state = match state {
                RTCPeerConnectionState::New => ConnectionState::New,
                RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                RTCPeerConnectionState::Closed => ConnectionState::Closed,
                _ => return,
            };
            debug!("Peer {} connection {} is {:?}", peer, connection, state);
            let _ = events.send(PeerEvent::StateChanged {
                peer,
                connection,
                state,
            });
        })
    }));
}

pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
}

impl WebRtcPeerConnection {
    async fn local_description(&self, kind: SdpKind) -> Result<SessionDescription, PeerError> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Sdp("no local description".to_string()))?;
        Ok(SessionDescription {
            kind,
            sdp: local.sdp,
        })
    }
}

/// Drain RTCP for a sender so interceptors keep running
fn spawn_rtcp_reader(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        let mut senders = self.senders.lock().await;
        if let Some(sender) = senders.get(&track.kind()) {
            return sender
                .replace_track(Some(track.rtc_track()))
                .await
                .map_err(|e| PeerError::Track(e.to_string()));
        }

        let sender = self
            .pc
            .add_track(track.rtc_track())
            .await
            .map_err(|e| PeerError::Track(format!("Failed to add {:?} track: {}", track.kind(), e)))?;
        spawn_rtcp_reader(sender.clone());
        senders.insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<bool, PeerError> {
        let senders = self.senders.lock().await;
        let Some(sender) = senders.get(&TrackKind::Video) else {
            return Ok(false);
        };
        sender
            .replace_track(track.map(|t| t.rtc_track()))
            .await
            .map_err(|e| PeerError::Track(format!("Failed to replace video track: {}", e)))?;
        Ok(true)
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set local description: {}", e)))?;
        self.local_description(SdpKind::Offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set local description: {}", e)))?;
        self.local_description(SdpKind::Answer).await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| PeerError::Sdp(format!("Invalid remote description: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn rollback(&self) -> Result<(), PeerError> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| PeerError::Sdp(format!("Rollback failed: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| PeerError::Ice(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.senders.lock().await.clear();
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to close connection: {}", e)))
    }
}
