//! Peer Connection Manager
//!
//! Sole owner of the participant id -> connection map. Every operation
//! returns the directed messages the caller must send instead of sending
//! them itself, so the manager stays free of transport concerns.
//!
//! Offer collisions are resolved by id: the lexicographically smaller id is
//! impolite and ignores a colliding offer, the larger id rolls back its own
//! offer and answers.

use super::{
    ConnectionId, ConnectionState, PeerConnection, PeerConnectionFactory, PeerContext, PeerError,
    PeerEvent,
};
use crate::domain::envelope::{IceCandidate, SessionDescription, SignalMessage};
use crate::domain::participant::TrackKind;
use crate::domain::shared::ParticipantId;
use crate::infrastructure::media::MediaTrack;
use crate::infrastructure::telemetry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Directed message produced by a negotiation step
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: ParticipantId,
    pub message: SignalMessage,
}

impl Outbound {
    fn offer(to: &ParticipantId, description: SessionDescription) -> Self {
        Self {
            to: to.clone(),
            message: SignalMessage::Offer(description),
        }
    }

    fn answer(to: &ParticipantId, description: SessionDescription) -> Self {
        Self {
            to: to.clone(),
            message: SignalMessage::Answer(description),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Negotiation {
    Stable,
    HaveLocalOffer,
}

struct PeerEntry {
    id: ConnectionId,
    connection: Arc<dyn PeerConnection>,
    negotiation: Negotiation,
    has_remote_description: bool,
    pending_candidates: Vec<IceCandidate>,
    /// Local tracks were added while an offer was outstanding
    needs_renegotiation: bool,
    state: ConnectionState,
    sending: HashSet<TrackKind>,
}

pub struct PeerConnectionManager {
    local_id: ParticipantId,
    factory: Arc<dyn PeerConnectionFactory>,
    events: mpsc::UnboundedSender<PeerEvent>,
    connections: HashMap<ParticipantId, PeerEntry>,
    next_connection: u64,
    outbound_audio: Option<MediaTrack>,
    outbound_video: Option<MediaTrack>,
}

impl PeerConnectionManager {
    pub fn new(
        local_id: ParticipantId,
        factory: Arc<dyn PeerConnectionFactory>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            local_id,
            factory,
            events,
            connections: HashMap::new(),
            next_connection: 1,
            outbound_audio: None,
            outbound_video: None,
        }
    }

    /// Whether the local side sends the initial offer to `peer`
    pub fn is_initiator_for(&self, peer: &ParticipantId) -> bool {
        self.local_id < *peer
    }

    pub fn contains(&self, peer: &ParticipantId) -> bool {
        self.connections.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connected peers in id order
    pub fn peer_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connection_id(&self, peer: &ParticipantId) -> Option<ConnectionId> {
        self.connections.get(peer).map(|entry| entry.id)
    }

    pub fn state(&self, peer: &ParticipantId) -> Option<ConnectionState> {
        self.connections.get(peer).map(|entry| entry.state)
    }

    /// Whether an event produced by `connection` still belongs to the live entry
    pub fn is_current(&self, peer: &ParticipantId, connection: ConnectionId) -> bool {
        self.connection_id(peer) == Some(connection)
    }

    pub fn outbound_video(&self) -> Option<&MediaTrack> {
        self.outbound_video.as_ref()
    }

    pub fn outbound_audio(&self) -> Option<&MediaTrack> {
        self.outbound_audio.as_ref()
    }

    /// Record a backend state change; stale generations are ignored
    pub fn record_state(
        &mut self,
        peer: &ParticipantId,
        connection: ConnectionId,
        state: ConnectionState,
    ) -> bool {
        match self.connections.get_mut(peer) {
            Some(entry) if entry.id == connection => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    /// Return the existing connection to `peer`, creating it if needed
    ///
    /// New connections start sending the current outbound tracks.
    pub async fn ensure_connection(
        &mut self,
        peer: &ParticipantId,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        if *peer == self.local_id {
            return Err(PeerError::SelfConnection(peer.to_string()));
        }
        if let Some(entry) = self.connections.get(peer) {
            return Ok(entry.connection.clone());
        }

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;

        let connection = self
            .factory
            .create(PeerContext {
                local: self.local_id.clone(),
                remote: peer.clone(),
                connection: id,
                events: self.events.clone(),
            })
            .await?;

        let mut sending = HashSet::new();
        for track in self.outbound_audio.iter().chain(self.outbound_video.iter()) {
            match connection.add_track(track).await {
                Ok(()) => {
                    sending.insert(track.kind());
                }
                Err(e) => warn!("Failed to add {:?} track for {}: {}", track.kind(), peer, e),
            }
        }

        self.connections.insert(
            peer.clone(),
            PeerEntry {
                id,
                connection: connection.clone(),
                negotiation: Negotiation::Stable,
                has_remote_description: false,
                pending_candidates: Vec::new(),
                needs_renegotiation: false,
                state: ConnectionState::New,
                sending,
            },
        );
        telemetry::record_peer_connection_opened();
        info!("Opened peer connection {} to {}", id, peer);

        Ok(connection)
    }

    /// Create an offer for `peer`, opening the connection if needed
    pub async fn offer_to(&mut self, peer: &ParticipantId) -> Result<Outbound, PeerError> {
        let connection = self.ensure_connection(peer).await?;
        let offer = connection.create_offer().await?;
        if let Some(entry) = self.connections.get_mut(peer) {
            entry.negotiation = Negotiation::HaveLocalOffer;
            entry.needs_renegotiation = false;
        }
        debug!("Created offer for {}", peer);
        Ok(Outbound::offer(peer, offer))
    }

    /// Answer an inbound offer
    ///
    /// Returns nothing when the offer collided with ours and we are the
    /// impolite side. A follow-up offer is appended when local tracks were
    /// added while our previous offer was outstanding.
    pub async fn handle_offer(
        &mut self,
        from: &ParticipantId,
        offer: SessionDescription,
    ) -> Result<Vec<Outbound>, PeerError> {
        if *from == self.local_id {
            return Err(PeerError::SelfConnection(from.to_string()));
        }

        let collision = self
            .connections
            .get(from)
            .map(|entry| entry.negotiation == Negotiation::HaveLocalOffer)
            .unwrap_or(false);
        if collision {
            if self.is_initiator_for(from) {
                info!("Ignoring colliding offer from {}", from);
                return Ok(Vec::new());
            }
            info!("Offer collision with {}, rolling back local offer", from);
            if let Some(entry) = self.connections.get_mut(from) {
                entry.connection.rollback().await?;
                entry.negotiation = Negotiation::Stable;
                entry.needs_renegotiation = true;
            }
        }

        let connection = self.ensure_connection(from).await?;
        connection.set_remote_description(offer).await?;
        self.flush_candidates(from).await;

        let answer = connection.create_answer().await?;
        let mut outbound = vec![Outbound::answer(from, answer)];
        debug!("Answered offer from {}", from);

        if self.take_renegotiation(from) {
            outbound.push(self.offer_to(from).await?);
        }
        Ok(outbound)
    }

    /// Apply an answer to our outstanding offer
    ///
    /// Answers for unknown peers or without an outstanding offer are
    /// dropped.
    pub async fn handle_answer(
        &mut self,
        from: &ParticipantId,
        answer: SessionDescription,
    ) -> Result<Vec<Outbound>, PeerError> {
        let connection = match self.connections.get(from) {
            Some(entry) if entry.negotiation == Negotiation::HaveLocalOffer => {
                entry.connection.clone()
            }
            Some(_) => {
                debug!("Dropping answer from {}: no outstanding offer", from);
                return Ok(Vec::new());
            }
            None => {
                debug!("Dropping answer from unknown peer {}", from);
                return Ok(Vec::new());
            }
        };

        connection.set_remote_description(answer).await?;
        if let Some(entry) = self.connections.get_mut(from) {
            entry.negotiation = Negotiation::Stable;
        }
        self.flush_candidates(from).await;
        debug!("Applied answer from {}", from);

        if self.take_renegotiation(from) {
            return Ok(vec![self.offer_to(from).await?]);
        }
        Ok(Vec::new())
    }

    /// Apply a remote ICE candidate, buffering it until a remote
    /// description exists
    pub async fn handle_ice_candidate(
        &mut self,
        from: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<(), PeerError> {
        let Some(entry) = self.connections.get_mut(from) else {
            debug!("Dropping ICE candidate from unknown peer {}", from);
            return Ok(());
        };
        if !entry.has_remote_description {
            entry.pending_candidates.push(candidate);
            return Ok(());
        }
        entry.connection.add_ice_candidate(candidate).await
    }

    /// Local media became available
    ///
    /// Tracks missing from existing connections are added and each affected
    /// connection renegotiates. Failures are isolated per peer.
    pub async fn attach_local_media(
        &mut self,
        audio: Option<MediaTrack>,
        video: Option<MediaTrack>,
    ) -> Vec<Outbound> {
        if audio.is_some() {
            self.outbound_audio = audio;
        }
        if video.is_some() {
            self.outbound_video = video;
        }

        let tracks: Vec<MediaTrack> = self
            .outbound_audio
            .iter()
            .chain(self.outbound_video.iter())
            .cloned()
            .collect();

        let mut outbound = Vec::new();
        for peer in self.peer_ids() {
            let mut added = false;
            for track in &tracks {
                let Some(entry) = self.connections.get_mut(&peer) else {
                    continue;
                };
                if entry.sending.contains(&track.kind()) {
                    continue;
                }
                match entry.connection.add_track(track).await {
                    Ok(()) => {
                        entry.sending.insert(track.kind());
                        added = true;
                    }
                    Err(e) => warn!("Failed to add {:?} track for {}: {}", track.kind(), peer, e),
                }
            }
            if added {
                if let Some(message) = self.renegotiate(&peer).await {
                    outbound.push(message);
                }
            }
        }
        outbound
    }

    /// Swap the outbound video track on every connection
    ///
    /// Connections without a video sender get the track added and
    /// renegotiate. Audio senders are untouched.
    pub async fn replace_outbound_video_track(
        &mut self,
        track: Option<MediaTrack>,
    ) -> Vec<Outbound> {
        self.outbound_video = track.clone();

        let mut outbound = Vec::new();
        for peer in self.peer_ids() {
            let Some(entry) = self.connections.get_mut(&peer) else {
                continue;
            };
            match entry.connection.replace_video_track(track.as_ref()).await {
                Ok(true) => debug!("Replaced outbound video for {}", peer),
                Ok(false) => {
                    let Some(track) = &track else {
                        continue;
                    };
                    match entry.connection.add_track(track).await {
                        Ok(()) => {
                            entry.sending.insert(TrackKind::Video);
                            if let Some(message) = self.renegotiate(&peer).await {
                                outbound.push(message);
                            }
                        }
                        Err(e) => warn!("Failed to add video track for {}: {}", peer, e),
                    }
                }
                Err(e) => {
                    telemetry::record_negotiation_failure();
                    warn!("Failed to replace video track for {}: {}", peer, e);
                }
            }
        }
        outbound
    }

    /// Close and forget the connection to `peer`
    pub async fn close(&mut self, peer: &ParticipantId) -> bool {
        let Some(entry) = self.connections.remove(peer) else {
            return false;
        };
        if let Err(e) = entry.connection.close().await {
            warn!("Error closing connection {} to {}: {}", entry.id, peer, e);
        }
        info!("Closed peer connection {} to {}", entry.id, peer);
        true
    }

    pub async fn close_all(&mut self) {
        for peer in self.peer_ids() {
            self.close(&peer).await;
        }
        self.outbound_audio = None;
        self.outbound_video = None;
    }

    /// Offer now, or after the outstanding offer is answered
    async fn renegotiate(&mut self, peer: &ParticipantId) -> Option<Outbound> {
        let entry = self.connections.get_mut(peer)?;
        if entry.negotiation == Negotiation::HaveLocalOffer {
            entry.needs_renegotiation = true;
            return None;
        }
        match self.offer_to(peer).await {
            Ok(message) => Some(message),
            Err(e) => {
                telemetry::record_negotiation_failure();
                warn!("Renegotiation with {} failed: {}", peer, e);
                None
            }
        }
    }

    fn take_renegotiation(&mut self, peer: &ParticipantId) -> bool {
        match self.connections.get_mut(peer) {
            Some(entry) if entry.needs_renegotiation => {
                entry.needs_renegotiation = false;
                true
            }
            _ => false,
        }
    }

    async fn flush_candidates(&mut self, peer: &ParticipantId) {
        let Some(entry) = self.connections.get_mut(peer) else {
            return;
        };
        entry.has_remote_description = true;
        let pending = std::mem::take(&mut entry.pending_candidates);
        for candidate in pending {
            if let Err(e) = entry.connection.add_ice_candidate(candidate).await {
                warn!("Buffered ICE candidate from {} rejected: {}", peer, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::TrackSource;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        tracks: Vec<String>,
        video: Option<String>,
        candidates: Vec<IceCandidate>,
        remote: Vec<SessionDescription>,
        rollbacks: usize,
        offers: usize,
        closed: bool,
    }

    #[derive(Default)]
    struct FakeConnection {
        recorded: Mutex<Recorded>,
    }

    #[async_trait]
    impl PeerConnection for FakeConnection {
        async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.tracks.push(track.id().to_string());
            if track.kind() == TrackKind::Video {
                recorded.video = Some(track.id().to_string());
            }
            Ok(())
        }

        async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<bool, PeerError> {
            let mut recorded = self.recorded.lock().unwrap();
            if recorded.video.is_none() {
                return Ok(false);
            }
            recorded.video = track.map(|t| t.id().to_string());
            Ok(true)
        }

        async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.offers += 1;
            Ok(SessionDescription::offer(format!("offer-{}", recorded.offers)))
        }

        async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
            Ok(SessionDescription::answer("answer"))
        }

        async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError> {
            self.recorded.lock().unwrap().remote.push(description);
            Ok(())
        }

        async fn rollback(&self) -> Result<(), PeerError> {
            self.recorded.lock().unwrap().rollbacks += 1;
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
            self.recorded.lock().unwrap().candidates.push(candidate);
            Ok(())
        }

        async fn close(&self) -> Result<(), PeerError> {
            self.recorded.lock().unwrap().closed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        created: Mutex<HashMap<ParticipantId, Arc<FakeConnection>>>,
    }

    impl FakeFactory {
        fn connection(&self, peer: &str) -> Arc<FakeConnection> {
            self.created.lock().unwrap()[&ParticipantId::from(peer)].clone()
        }
    }

    #[async_trait]
    impl PeerConnectionFactory for FakeFactory {
        async fn create(&self, context: PeerContext) -> Result<Arc<dyn PeerConnection>, PeerError> {
            let connection = Arc::new(FakeConnection::default());
            self.created
                .lock()
                .unwrap()
                .insert(context.remote.clone(), connection.clone());
            Ok(connection)
        }
    }

    fn manager(local: &str) -> (PeerConnectionManager, Arc<FakeFactory>) {
        let factory = Arc::new(FakeFactory::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        (
            PeerConnectionManager::new(local.into(), factory.clone(), tx),
            factory,
        )
    }

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 1 10.0.0.1 5000 typ host", n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_ensure_connection_is_idempotent() {
        let (mut manager, _factory) = manager("a");
        let bob = ParticipantId::from("b");

        let first = manager.ensure_connection(&bob).await.unwrap();
        let second = manager.ensure_connection(&bob).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.connection_id(&bob), Some(ConnectionId(1)));
    }

    #[tokio::test]
    async fn test_never_connects_to_self() {
        let (mut manager, _factory) = manager("a");

        let result = manager.ensure_connection(&"a".into()).await;
        assert!(matches!(result, Err(PeerError::SelfConnection(_))));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_remote_description() {
        let (mut manager, factory) = manager("b");
        let alice = ParticipantId::from("a");
        manager.ensure_connection(&alice).await.unwrap();

        manager.handle_ice_candidate(&alice, candidate(1)).await.unwrap();
        assert!(factory.connection("a").recorded.lock().unwrap().candidates.is_empty());

        let replies = manager
            .handle_offer(&alice, SessionDescription::offer("remote"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0].message, SignalMessage::Answer(_)));
        assert_eq!(factory.connection("a").recorded.lock().unwrap().candidates.len(), 1);

        manager.handle_ice_candidate(&alice, candidate(2)).await.unwrap();
        assert_eq!(factory.connection("a").recorded.lock().unwrap().candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_candidate_for_unknown_peer_is_dropped() {
        let (mut manager, _factory) = manager("a");

        manager
            .handle_ice_candidate(&"ghost".into(), candidate(1))
            .await
            .unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_unsolicited_answer_is_dropped() {
        let (mut manager, factory) = manager("a");
        let bob = ParticipantId::from("b");
        manager.ensure_connection(&bob).await.unwrap();

        let replies = manager
            .handle_answer(&bob, SessionDescription::answer("late"))
            .await
            .unwrap();

        assert!(replies.is_empty());
        assert!(factory.connection("b").recorded.lock().unwrap().remote.is_empty());
    }

    #[tokio::test]
    async fn test_impolite_side_ignores_colliding_offer() {
        let (mut manager, factory) = manager("a");
        let bob = ParticipantId::from("b");
        manager.offer_to(&bob).await.unwrap();

        let replies = manager
            .handle_offer(&bob, SessionDescription::offer("theirs"))
            .await
            .unwrap();

        assert!(replies.is_empty());
        assert_eq!(factory.connection("b").recorded.lock().unwrap().rollbacks, 0);
    }

    #[tokio::test]
    async fn test_polite_side_rolls_back_and_answers() {
        let (mut manager, factory) = manager("b");
        let alice = ParticipantId::from("a");
        manager.offer_to(&alice).await.unwrap();

        let replies = manager
            .handle_offer(&alice, SessionDescription::offer("theirs"))
            .await
            .unwrap();

        let recorded = factory.connection("a");
        assert_eq!(recorded.recorded.lock().unwrap().rollbacks, 1);
        assert!(matches!(replies[0].message, SignalMessage::Answer(_)));
        // The rolled-back offer is retried after answering.
        assert!(matches!(replies.last().unwrap().message, SignalMessage::Offer(_)));
    }

    #[tokio::test]
    async fn test_late_media_renegotiates_existing_connections() {
        let (mut manager, factory) = manager("a");
        for peer in ["b", "c"] {
            let id = ParticipantId::from(peer);
            manager.offer_to(&id).await.unwrap();
            manager
                .handle_answer(&id, SessionDescription::answer("ok"))
                .await
                .unwrap();
        }

        let mic = MediaTrack::new(TrackSource::Microphone, "local");
        let cam = MediaTrack::new(TrackSource::Camera, "local");
        let offers = manager.attach_local_media(Some(mic), Some(cam)).await;

        assert_eq!(offers.len(), 2);
        assert!(offers.iter().all(|o| matches!(o.message, SignalMessage::Offer(_))));
        assert_eq!(factory.connection("b").recorded.lock().unwrap().tracks.len(), 2);

        // Already sending: nothing to renegotiate.
        let again = manager.attach_local_media(None, None).await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_media_during_outstanding_offer_waits_for_answer() {
        let (mut manager, _factory) = manager("a");
        let bob = ParticipantId::from("b");
        manager.offer_to(&bob).await.unwrap();

        let mic = MediaTrack::new(TrackSource::Microphone, "local");
        assert!(manager.attach_local_media(Some(mic), None).await.is_empty());

        let follow_up = manager
            .handle_answer(&bob, SessionDescription::answer("ok"))
            .await
            .unwrap();
        assert_eq!(follow_up.len(), 1);
        assert!(matches!(follow_up[0].message, SignalMessage::Offer(_)));
    }

    #[tokio::test]
    async fn test_replace_video_track_on_every_connection() {
        let (mut manager, factory) = manager("a");
        let mic = MediaTrack::new(TrackSource::Microphone, "local");
        let cam = MediaTrack::new(TrackSource::Camera, "local");
        manager.attach_local_media(Some(mic.clone()), Some(cam.clone())).await;
        manager.ensure_connection(&"b".into()).await.unwrap();
        manager.ensure_connection(&"c".into()).await.unwrap();

        let screen = MediaTrack::new(TrackSource::Screen, "screen");
        let offers = manager.replace_outbound_video_track(Some(screen.clone())).await;

        assert!(offers.is_empty());
        for peer in ["b", "c"] {
            let connection = factory.connection(peer);
            let recorded = connection.recorded.lock().unwrap();
            assert_eq!(recorded.video.as_deref(), Some(screen.id()));
            assert!(recorded.tracks.contains(&mic.id().to_string()));
        }
        assert!(manager.outbound_video().unwrap().same_as(&screen));
        assert!(manager.outbound_audio().unwrap().same_as(&mic));
    }

    #[tokio::test]
    async fn test_replace_adds_track_where_no_video_sender() {
        let (mut manager, factory) = manager("a");
        manager.ensure_connection(&"b".into()).await.unwrap();

        let screen = MediaTrack::new(TrackSource::Screen, "screen");
        let offers = manager.replace_outbound_video_track(Some(screen.clone())).await;

        assert_eq!(offers.len(), 1);
        assert_eq!(
            factory.connection("b").recorded.lock().unwrap().video.as_deref(),
            Some(screen.id())
        );
    }

    #[tokio::test]
    async fn test_stale_state_change_is_ignored() {
        let (mut manager, _factory) = manager("a");
        let bob = ParticipantId::from("b");
        manager.ensure_connection(&bob).await.unwrap();
        manager.close(&bob).await;
        manager.ensure_connection(&bob).await.unwrap();

        assert!(!manager.record_state(&bob, ConnectionId(1), ConnectionState::Failed));
        assert!(manager.record_state(&bob, ConnectionId(2), ConnectionState::Connected));
        assert_eq!(manager.state(&bob), Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_close_marks_connection_closed() {
        let (mut manager, factory) = manager("a");
        let bob = ParticipantId::from("b");
        manager.ensure_connection(&bob).await.unwrap();

        assert!(manager.close(&bob).await);
        assert!(!manager.close(&bob).await);
        assert!(factory.connection("b").recorded.lock().unwrap().closed);
        assert!(!manager.contains(&bob));
    }
}
