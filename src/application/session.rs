//! Session Façade
//!
//! Owns the roster, chat log, media controller and peer connection manager
//! for one participant in one room. Every input (relay envelopes, peer
//! callbacks, finished media requests, timers) is handled one at a time on
//! the session's own context, so none of that state needs locking. Each
//! handler must still tolerate a view that changed since the input was
//! produced, e.g. a candidate for a connection that has since been closed.

use super::error::SessionError;
use super::snapshot::{RelayState, SessionSnapshot};
use crate::domain::chat::{normalize_text, ChatLog, ChatMessage};
use crate::domain::envelope::{ChatPayload, ParticipantInfo, SignalEnvelope, SignalMessage, StateUpdate};
use crate::domain::participant::{PeerPhase, RemoteTrackInfo};
use crate::domain::roster::{MergeOutcome, Roster};
use crate::domain::shared::{Identity, ParticipantId, RoomId};
use crate::domain::speaking::SpeakingDetector;
use crate::infrastructure::media::{MediaConstraints, MediaController, MediaDevices, MediaError, MediaTrack, UserMedia};
use crate::infrastructure::peer::{
    ConnectionState, Outbound, PeerConnectionFactory, PeerConnectionManager, PeerError, PeerEvent,
};
use crate::infrastructure::signaling::{
    RelayConnector, SignalingTransport, TokenProvider, TransportEvent,
};
use crate::infrastructure::telemetry;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Tunables for one session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Wait before broadcasting `request-participant-list` after joining
    pub discovery_delay: Duration,
    pub media: MediaConstraints,
    pub start_muted: bool,
    pub start_video_off: bool,
    pub speaking_threshold: f32,
    pub speaking_hold: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            discovery_delay: Duration::from_millis(1000),
            media: MediaConstraints::default(),
            start_muted: false,
            start_video_off: false,
            speaking_threshold: 0.05,
            speaking_hold: Duration::from_millis(750),
        }
    }
}

/// One unit of work for the session loop
#[derive(Debug)]
pub enum Input {
    Transport(TransportEvent),
    Peer(PeerEvent),
    MediaAcquired(Result<UserMedia, MediaError>),
    /// Screen capture stopped from outside the session (e.g. the OS picker)
    ScreenCaptureEnded { track_id: String },
    DiscoveryDue,
}

/// How to reach the relay again after a disconnect
#[derive(Clone)]
struct RelayAccess {
    connector: Arc<dyn RelayConnector>,
    tokens: Arc<dyn TokenProvider>,
}

pub struct Session {
    room: RoomId,
    settings: SessionSettings,
    roster: Roster,
    chat: ChatLog,
    speaking: SpeakingDetector,
    media: MediaController,
    peers: PeerConnectionManager,
    access: Option<RelayAccess>,
    transport: Option<Arc<dyn SignalingTransport>>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    relay: RelayState,
    media_warning: Option<String>,
    /// Screen track currently standing in for the camera
    shared_track: Option<String>,
    left: bool,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl Session {
    pub fn new(
        identity: Identity,
        room: RoomId,
        settings: SessionSettings,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        let mut roster = Roster::new(&identity);
        roster.local_mut().is_muted = settings.start_muted;

        let mut session = Self {
            peers: PeerConnectionManager::new(identity.id.clone(), factory, peer_tx),
            media: MediaController::new(devices, settings.media),
            speaking: SpeakingDetector::new(settings.speaking_threshold, settings.speaking_hold),
            chat: ChatLog::new(),
            roster,
            room,
            settings,
            access: None,
            transport: None,
            transport_events: None,
            peer_events,
            inputs_tx,
            inputs_rx,
            relay: RelayState::Disconnected,
            media_warning: None,
            shared_track: None,
            left: false,
            state_tx: watch::channel(placeholder_snapshot(&identity)).0,
        };
        session.publish();
        session
    }

    pub fn local_id(&self) -> &ParticipantId {
        self.roster.local_id()
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    pub fn media(&self) -> &MediaController {
        &self.media
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay
    }

    pub fn has_left(&self) -> bool {
        self.left
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let local = self.roster.local();
        SessionSnapshot {
            local_id: local.id.clone(),
            room_id: self.room.clone(),
            participants: self.roster.sorted(),
            chat: self.chat.messages().to_vec(),
            is_muted: local.is_muted,
            is_video_on: local.is_video_on,
            is_hand_raised: local.is_hand_raised,
            is_screen_sharing: local.is_screen_sharing,
            relay: self.relay,
            media_warning: self.media_warning.clone(),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Connect to the relay, join the room group and announce ourselves
    ///
    /// The connector and token provider are kept for `reconnect`.
    pub async fn join(
        &mut self,
        connector: Arc<dyn RelayConnector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<(), SessionError> {
        if self.left {
            return Err(SessionError::AlreadyLeft);
        }
        self.access = Some(RelayAccess { connector, tokens });
        self.reconnect().await
    }

    /// Re-run the connect sequence with the relay given to `join`
    ///
    /// Peer connections are kept; the announce and discovery round lets
    /// everyone refresh this participant. Whether and when to call this
    /// after a relay disconnect is up to the caller.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.left {
            return Err(SessionError::AlreadyLeft);
        }
        let Some(access) = self.access.clone() else {
            return Err(SessionError::NotJoined);
        };

        self.relay = RelayState::Connecting;
        self.publish();

        if let Err(e) = self.connect(access.connector.as_ref(), access.tokens.as_ref()).await {
            warn!("Participant {} failed to join room {}: {}", self.local_id(), self.room, e);
            self.relay = RelayState::Disconnected;
            self.publish();
            return Err(e);
        }

        self.relay = RelayState::Connected;
        info!("Participant {} joined room {}", self.local_id(), self.room);

        self.broadcast(SignalMessage::UserJoined(self.roster.local().info()));
        self.schedule_discovery();
        self.publish();
        Ok(())
    }

    async fn connect(
        &mut self,
        connector: &dyn RelayConnector,
        tokens: &dyn TokenProvider,
    ) -> Result<(), SessionError> {
        if let Some(previous) = self.transport.take() {
            previous.disconnect().await;
        }
        self.transport_events = None;

        let credential = tokens.issue(&self.room, self.roster.local_id()).await?;
        let connection = connector.connect(&credential).await?;
        if let Err(e) = connection.transport.join_group(&self.room).await {
            connection.transport.disconnect().await;
            return Err(e.into());
        }

        self.transport = Some(connection.transport);
        self.transport_events = Some(connection.events);
        Ok(())
    }

    fn schedule_discovery(&self) {
        let delay = self.settings.discovery_delay;
        if delay.is_zero() {
            self.request_participant_list();
            return;
        }
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(Input::DiscoveryDue);
        });
    }

    /// Ask everyone already in the room to describe themselves
    pub fn request_participant_list(&self) {
        self.broadcast(SignalMessage::RequestParticipantList(Some(
            self.roster.local().info(),
        )));
    }

    /// Leave the room
    ///
    /// Local tracks are stopped and peer connections closed before the
    /// relay disconnect is awaited.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        if self.left {
            return Ok(());
        }

        self.broadcast(SignalMessage::UserLeft);
        self.shared_track = None;
        self.media.stop_all();
        self.peers.close_all().await;
        self.roster.clear_remote();
        self.roster.local_mut().is_screen_sharing = false;
        self.left = true;

        self.transport_events = None;
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
        }
        self.relay = RelayState::Disconnected;
        info!("Participant {} left room {}", self.local_id(), self.room);
        self.publish();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------

    /// Acquire camera and microphone, waiting for the result
    pub async fn start_media(&mut self) -> Result<(), SessionError> {
        let result = self.media.request_user_media().await;
        self.on_user_media(result).await?;
        Ok(())
    }

    /// Acquire camera and microphone without blocking the session
    pub fn start_media_in_background(&self) {
        let request = self.media.request_user_media();
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            let _ = inputs.send(Input::MediaAcquired(request.await));
        });
    }

    /// Media-attached transition
    async fn on_user_media(&mut self, result: Result<UserMedia, MediaError>) -> Result<(), MediaError> {
        if self.left {
            if let Ok(media) = result {
                media.stream.stop();
            }
            return Ok(());
        }

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                warn!("Local media unavailable for {}: {}", self.local_id(), e);
                self.media_warning = Some(e.to_string());
                self.apply_local_flags(true, false);
                self.publish();
                return Err(e);
            }
        };

        if let Some(degraded) = &media.degraded {
            self.media_warning = Some(format!("Camera unavailable, joined with audio only: {}", degraded));
        }
        self.media.attach_user_media(media.stream);

        let muted = self.roster.local().is_muted || self.media.audio_track().is_none();
        let video_on = !self.settings.start_video_off && self.media.video_track().is_some();
        self.media.set_audio_enabled(!muted);
        self.media.set_video_enabled(video_on);
        self.apply_local_flags(muted, video_on);

        let video = if self.media.is_sharing() {
            None
        } else {
            self.media.video_track()
        };
        let outbound = self
            .peers
            .attach_local_media(self.media.audio_track(), video)
            .await;
        self.send_outbound(outbound);
        self.publish();
        Ok(())
    }

    /// Set local mute/video flags, broadcasting whatever changed
    fn apply_local_flags(&mut self, muted: bool, video_on: bool) {
        let local = self.roster.local_mut();
        let update = StateUpdate {
            is_muted: (local.is_muted != muted).then_some(muted),
            is_video_on: (local.is_video_on != video_on).then_some(video_on),
            is_hand_raised: None,
        };
        local.is_muted = muted;
        local.is_video_on = video_on;
        if !update.is_empty() {
            self.broadcast(SignalMessage::UserStateUpdate(update));
        }
    }

    /// Flip the microphone; returns whether we are now muted
    pub fn toggle_mute(&mut self) -> bool {
        let muted = !self.roster.local().is_muted;
        self.media.set_audio_enabled(!muted);
        self.roster.local_mut().is_muted = muted;
        self.broadcast(SignalMessage::UserStateUpdate(StateUpdate {
            is_muted: Some(muted),
            ..Default::default()
        }));
        self.publish();
        muted
    }

    /// Flip the camera; returns whether video is now on
    ///
    /// A camera track that is missing or has ended is re-acquired and
    /// swapped into every connection.
    pub async fn toggle_video(&mut self) -> Result<bool, SessionError> {
        let video_on = !self.roster.local().is_video_on;

        if video_on && self.media.video_track().is_none() {
            match self.media.reacquire_video().await {
                Ok(track) => {
                    track.set_enabled(true);
                    if !self.media.is_sharing() {
                        let outbound = self.peers.replace_outbound_video_track(Some(track)).await;
                        self.send_outbound(outbound);
                    }
                }
                Err(e) => {
                    warn!("Camera re-acquisition failed for {}: {}", self.local_id(), e);
                    self.media_warning = Some(e.to_string());
                    self.publish();
                    return Err(e.into());
                }
            }
        } else {
            self.media.set_video_enabled(video_on);
        }

        self.roster.local_mut().is_video_on = video_on;
        self.broadcast(SignalMessage::UserStateUpdate(StateUpdate {
            is_video_on: Some(video_on),
            ..Default::default()
        }));
        self.publish();
        Ok(video_on)
    }

    pub fn toggle_hand_raise(&mut self) -> bool {
        let raised = !self.roster.local().is_hand_raised;
        self.roster.local_mut().is_hand_raised = raised;
        self.broadcast(SignalMessage::UserStateUpdate(StateUpdate {
            is_hand_raised: Some(raised),
            ..Default::default()
        }));
        self.publish();
        raised
    }

    /// Returns false for blank text, which is not sent
    pub fn send_chat_message(&mut self, text: &str) -> bool {
        let Some(text) = normalize_text(text) else {
            return false;
        };

        let now = Utc::now();
        let local = self.roster.local();
        let sender_name = local.name.clone();
        self.chat.push(ChatMessage::new(
            local.id.clone(),
            sender_name.clone(),
            text.clone(),
            now,
        ));
        self.broadcast(SignalMessage::ChatMessage(ChatPayload {
            text,
            sender_name: Some(sender_name),
            timestamp: now.timestamp_millis(),
        }));
        self.publish();
        true
    }

    /// Start or stop sharing; returns whether a share is now active
    pub async fn toggle_screen_share(&mut self) -> Result<bool, SessionError> {
        if self.media.is_sharing() {
            self.stop_screen_share().await;
            return Ok(false);
        }

        let track = match self.media.start_screen_share().await {
            Ok(track) => track,
            Err(e) => {
                warn!("Screen capture failed for {}: {}", self.local_id(), e);
                self.media_warning = Some(e.to_string());
                self.publish();
                return Err(e.into());
            }
        };

        let outbound = self
            .peers
            .replace_outbound_video_track(Some(track.clone()))
            .await;
        self.send_outbound(outbound);

        self.shared_track = Some(track.id().to_string());
        self.roster.local_mut().is_screen_sharing = true;
        self.broadcast(SignalMessage::ScreenShareStart);
        self.watch_capture_end(track);
        self.publish();
        Ok(true)
    }

    fn watch_capture_end(&self, track: MediaTrack) {
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            track.ended().await;
            let _ = inputs.send(Input::ScreenCaptureEnded {
                track_id: track.id().to_string(),
            });
        });
    }

    /// Put the camera back on every connection
    async fn stop_screen_share(&mut self) {
        self.media.stop_screen_share();
        self.shared_track = None;

        let camera = self.media.video_track();
        let outbound = self.peers.replace_outbound_video_track(camera).await;
        self.send_outbound(outbound);

        self.roster.local_mut().is_screen_sharing = false;
        self.broadcast(SignalMessage::ScreenShareStop);
        self.publish();
    }

    /// Feed an audio level sample (0.0 - 1.0) for any participant
    pub fn report_audio_level(&mut self, participant: &ParticipantId, level: f32) -> bool {
        if !self.roster.contains(participant) {
            return false;
        }
        let speaking = self.speaking.observe(participant, level, Instant::now());
        let changed = self.roster.set_speaking(participant, speaking);
        if changed {
            self.publish();
        }
        changed
    }

    // ------------------------------------------------------------------
    // Input dispatch
    // ------------------------------------------------------------------

    /// Wait for the next input; safe to cancel
    pub async fn next_input(&mut self) -> Input {
        tokio::select! {
            event = next_transport_event(&mut self.transport_events) => Input::Transport(event),
            Some(event) = self.peer_events.recv() => Input::Peer(event),
            Some(input) = self.inputs_rx.recv() => input,
        }
    }

    pub async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Transport(event) => self.handle_transport_event(event).await,
            Input::Peer(event) => self.handle_peer_event(event).await,
            Input::MediaAcquired(result) => {
                let _ = self.on_user_media(result).await;
            }
            Input::ScreenCaptureEnded { track_id } => {
                if self.shared_track.as_deref() == Some(track_id.as_str()) {
                    info!("Screen capture {} ended outside the session", track_id);
                    self.stop_screen_share().await;
                }
            }
            Input::DiscoveryDue => {
                if self.transport.is_some() && !self.left {
                    self.request_participant_list();
                }
            }
        }
    }

    /// Wait for one input and handle it
    pub async fn pump(&mut self) {
        let input = self.next_input().await;
        self.handle_input(input).await;
    }

    /// Handle every input that is already queued; returns how many
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let input = if let Some(event) = self.try_transport_event() {
                Input::Transport(event)
            } else if let Ok(event) = self.peer_events.try_recv() {
                Input::Peer(event)
            } else if let Ok(input) = self.inputs_rx.try_recv() {
                input
            } else {
                break;
            };
            self.handle_input(input).await;
            handled += 1;
        }
        handled
    }

    fn try_transport_event(&mut self) -> Option<TransportEvent> {
        let events = self.transport_events.as_mut()?;
        match events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(TransportEvent::Disconnected {
                reason: Some("relay event stream closed".to_string()),
            }),
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { connection_id } => {
                debug!("Relay connection established: {:?}", connection_id);
            }
            TransportEvent::Envelope(envelope) => self.handle_envelope(envelope).await,
            TransportEvent::Malformed(reason) => {
                telemetry::record_envelope_dropped("malformed");
                warn!("Dropping malformed envelope in room {}: {}", self.room, reason);
            }
            TransportEvent::Disconnected { reason } => {
                warn!(
                    "Relay disconnected for {} in room {}: {}",
                    self.local_id(),
                    self.room,
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.transport = None;
                self.transport_events = None;
                self.relay = RelayState::Disconnected;
                self.roster.mark_remote_stale();
                self.publish();
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: SignalEnvelope) {
        let local_id = self.local_id().clone();
        if envelope.from == local_id {
            return;
        }
        if envelope.room_id != self.room {
            telemetry::record_envelope_dropped("room");
            debug!("Dropping {} for room {}", envelope.kind(), envelope.room_id);
            return;
        }
        if !envelope.is_for(&local_id) {
            telemetry::record_envelope_dropped("not_addressed");
            return;
        }

        if envelope.message.is_negotiation() && self.roster.has_departed(&envelope.from) {
            telemetry::record_envelope_dropped("departed");
            debug!("Dropping late {} from departed participant {}", envelope.kind(), envelope.from);
            return;
        }

        telemetry::record_envelope_received(envelope.kind().as_str());
        let SignalEnvelope { from, message, .. } = envelope;
        self.roster.refresh(&from);

        match message {
            SignalMessage::UserJoined(info) => self.on_discovered(&from, &info, true).await,
            SignalMessage::ParticipantInfo(info) => self.on_discovered(&from, &info, false).await,
            SignalMessage::RequestParticipantList(requester) => {
                self.roster.readmit(&from);
                if let Some(info) = requester {
                    self.on_discovered(&from, &info, false).await;
                }
                self.send_to(&from, SignalMessage::ParticipantInfo(self.roster.local().info()));
            }
            SignalMessage::UserStateUpdate(update) => {
                if !self.roster.apply_state_update(&from, &update) {
                    debug!("Ignoring state update from unknown participant {}", from);
                }
            }
            SignalMessage::UserLeft => self.remove_participant(&from, "left the room").await,
            SignalMessage::Offer(offer) => {
                self.roster.ensure(&from);
                self.mark_negotiating(&from);
                match self.peers.handle_offer(&from, offer).await {
                    Ok(outbound) => self.send_outbound(outbound),
                    Err(e) => negotiation_failed(&from, &e),
                }
            }
            SignalMessage::Answer(answer) => match self.peers.handle_answer(&from, answer).await {
                Ok(outbound) => self.send_outbound(outbound),
                Err(e) => negotiation_failed(&from, &e),
            },
            SignalMessage::IceCandidate(candidate) => {
                if let Err(e) = self.peers.handle_ice_candidate(&from, candidate).await {
                    negotiation_failed(&from, &e);
                }
            }
            SignalMessage::ChatMessage(payload) => self.on_chat(&from, payload),
            SignalMessage::ScreenShareStart => {
                self.roster.set_screen_sharing(&from, true);
            }
            SignalMessage::ScreenShareStop => {
                self.roster.set_screen_sharing(&from, false);
            }
        }
        self.publish();
    }

    /// Merge a self-description and open a connection when we are the offerer
    async fn on_discovered(&mut self, from: &ParticipantId, info: &ParticipantInfo, reply: bool) {
        let outcome = self.roster.merge(from, info);
        if outcome == MergeOutcome::IgnoredSelf {
            return;
        }
        if outcome.is_new() {
            info!("Participant {} ({}) discovered in room {}", from, info.name, self.room);
        }
        if reply {
            self.send_to(from, SignalMessage::ParticipantInfo(self.roster.local().info()));
        }

        if self.peers.contains(from) || !self.peers.is_initiator_for(from) {
            return;
        }
        match self.peers.offer_to(from).await {
            Ok(offer) => self.send_outbound(vec![offer]),
            Err(e) => negotiation_failed(from, &e),
        }
    }

    fn on_chat(&mut self, from: &ParticipantId, payload: ChatPayload) {
        let Some(text) = normalize_text(&payload.text) else {
            debug!("Dropping blank chat message from {}", from);
            return;
        };
        let sender_name = self
            .roster
            .display_name(from)
            .map(str::to_string)
            .or(payload.sender_name)
            .unwrap_or_else(|| from.to_string());
        self.chat.push(ChatMessage::new(
            from.clone(),
            sender_name,
            text,
            ChatMessage::timestamp_from_millis(payload.timestamp),
        ));
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let peer = event.peer().clone();
        let connection = event.connection();
        if !self.peers.is_current(&peer, connection) {
            debug!("Dropping event from stale connection {} to {}", connection, peer);
            return;
        }

        match event {
            PeerEvent::LocalCandidate { candidate, .. } => {
                self.send_to(&peer, SignalMessage::IceCandidate(candidate));
            }
            PeerEvent::RemoteTrack { track, .. } => {
                debug!("Remote {:?} track {} from {}", track.kind, track.id, peer);
                self.roster.attach_track(
                    &peer,
                    &track.stream_id,
                    RemoteTrackInfo {
                        id: track.id,
                        kind: track.kind,
                    },
                );
            }
            PeerEvent::StateChanged { state, .. } => {
                self.peers.record_state(&peer, connection, state);
                if state == ConnectionState::Connected {
                    info!("Peer connection to {} established", peer);
                    self.roster.set_phase(&peer, PeerPhase::Connected);
                } else if state.is_lost() {
                    self.remove_participant(&peer, "peer connection lost").await;
                }
            }
        }
        self.publish();
    }

    async fn remove_participant(&mut self, id: &ParticipantId, reason: &str) {
        self.peers.close(id).await;
        self.speaking.forget(id);
        if self.roster.remove(id).is_some() {
            info!("Participant {} removed from room {}: {}", id, self.room, reason);
        }
    }

    fn mark_negotiating(&mut self, peer: &ParticipantId) {
        if matches!(self.roster.phase(peer), PeerPhase::Unknown | PeerPhase::Announced) {
            self.roster.set_phase(peer, PeerPhase::Negotiating);
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn send_outbound(&mut self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            if matches!(message, SignalMessage::Offer(_)) {
                self.mark_negotiating(&to);
            }
            self.send_to(&to, message);
        }
    }

    fn broadcast(&self, message: SignalMessage) {
        let envelope = SignalEnvelope::broadcast(self.local_id().clone(), self.room.clone(), message);
        self.publish_envelope(envelope);
    }

    fn send_to(&self, to: &ParticipantId, message: SignalMessage) {
        let envelope = SignalEnvelope::directed(
            self.local_id().clone(),
            to.clone(),
            self.room.clone(),
            message,
        );
        self.publish_envelope(envelope);
    }

    fn publish_envelope(&self, envelope: SignalEnvelope) {
        let kind = envelope.kind();
        let Some(transport) = &self.transport else {
            debug!("Not connected to the relay, dropping outbound {}", kind);
            return;
        };
        match transport.send(&self.room, &envelope) {
            Ok(()) => telemetry::record_envelope_sent(kind.as_str()),
            Err(e) => warn!("Failed to send {} to room {}: {}", kind, self.room, e),
        }
    }
}

fn negotiation_failed(peer: &ParticipantId, error: &PeerError) {
    telemetry::record_negotiation_failure();
    warn!("Negotiation with {} failed: {}", peer, error);
}

async fn next_transport_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> TransportEvent {
    match events {
        Some(events) => events.recv().await.unwrap_or(TransportEvent::Disconnected {
            reason: Some("relay event stream closed".to_string()),
        }),
        None => std::future::pending().await,
    }
}

fn placeholder_snapshot(identity: &Identity) -> SessionSnapshot {
    SessionSnapshot {
        local_id: identity.id.clone(),
        room_id: RoomId::new(""),
        participants: Vec::new(),
        chat: Vec::new(),
        is_muted: false,
        is_video_on: false,
        is_hand_raised: false,
        is_screen_sharing: false,
        relay: RelayState::Disconnected,
        media_warning: None,
    }
}
