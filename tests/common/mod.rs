//! Shared fixtures for session integration tests
//!
//! `TestRelay` queues every envelope per (sender, recipient) pair and only
//! delivers when told to, so a test controls how deliveries from different
//! senders interleave. Order between one sender and one recipient is kept,
//! as it is on the hosted relay.

#![allow(dead_code)]

use async_trait::async_trait;
use meshmeet::application::{Session, SessionSettings};
use meshmeet::domain::envelope::{EnvelopeType, IceCandidate, SdpKind, SessionDescription, SignalEnvelope};
use meshmeet::domain::participant::TrackKind;
use meshmeet::domain::shared::{Identity, ParticipantId, Role, RoomId};
use meshmeet::infrastructure::media::{MediaTrack, SyntheticMediaDevices};
use meshmeet::infrastructure::peer::{
    ConnectionState, PeerConnection, PeerConnectionFactory, PeerContext, PeerError, PeerEvent,
};
use meshmeet::infrastructure::signaling::{
    RelayConnection, RelayConnector, RelayCredential, SignalingTransport, StaticTokenProvider,
    TransportError, TransportEvent,
};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ROOM: &str = "standup";

// ----------------------------------------------------------------------
// Relay
// ----------------------------------------------------------------------

struct Member {
    groups: HashSet<RoomId>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct Hub {
    next_member: u64,
    next_seq: u64,
    members: HashMap<u64, Member>,
    queues: BTreeMap<(u64, u64), VecDeque<(u64, String)>>,
    sent: Vec<SignalEnvelope>,
}

/// How queued envelopes are picked
pub enum Delivery {
    /// Oldest first across all pairs
    Fifo,
    /// Random pair each step
    Shuffled(StdRng),
}

#[derive(Clone, Default)]
pub struct TestRelay {
    hub: Arc<Mutex<Hub>>,
}

impl TestRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope published so far, in send order
    pub fn sent(&self) -> Vec<SignalEnvelope> {
        self.hub.lock().unwrap().sent.clone()
    }

    pub fn sent_by(&self, from: &str, kind: EnvelopeType) -> Vec<SignalEnvelope> {
        self.sent()
            .into_iter()
            .filter(|e| e.from.as_str() == from && e.kind() == kind)
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.hub.lock().unwrap().queues.values().map(VecDeque::len).sum()
    }

    /// Deliver one queued envelope; returns false when nothing is queued
    pub fn deliver_next(&self, delivery: &mut Delivery) -> bool {
        let mut hub = self.hub.lock().unwrap();
        let ready: Vec<(u64, u64)> = hub
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| *key)
            .collect();
        if ready.is_empty() {
            return false;
        }

        let key = match delivery {
            Delivery::Fifo => *ready
                .iter()
                .min_by_key(|key| hub.queues[*key].front().map(|(seq, _)| *seq))
                .unwrap(),
            Delivery::Shuffled(rng) => ready[rng.gen_range(0..ready.len())],
        };
        let (_, text) = hub.queues.get_mut(&key).unwrap().pop_front().unwrap();

        if let Some(member) = hub.members.get(&key.1) {
            let event = match serde_json::from_str::<SignalEnvelope>(&text) {
                Ok(envelope) => TransportEvent::Envelope(envelope),
                Err(e) => TransportEvent::Malformed(e.to_string()),
            };
            let _ = member.events.send(event);
        }
        true
    }
}

#[async_trait]
impl RelayConnector for TestRelay {
    async fn connect(&self, _credential: &RelayCredential) -> Result<RelayConnection, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let member = {
            let mut hub = self.hub.lock().unwrap();
            hub.next_member += 1;
            let id = hub.next_member;
            hub.members.insert(
                id,
                Member {
                    groups: HashSet::new(),
                    events: tx,
                },
            );
            id
        };
        Ok(RelayConnection {
            transport: Arc::new(TestTransport {
                hub: self.hub.clone(),
                member,
                connected: AtomicBool::new(true),
            }),
            events: rx,
        })
    }
}

struct TestTransport {
    hub: Arc<Mutex<Hub>>,
    member: u64,
    connected: AtomicBool,
}

#[async_trait]
impl SignalingTransport for TestTransport {
    async fn join_group(&self, room: &RoomId) -> Result<(), TransportError> {
        let mut hub = self.hub.lock().unwrap();
        let member = hub.members.get_mut(&self.member).ok_or(TransportError::Closed)?;
        member.groups.insert(room.clone());
        Ok(())
    }

    fn send(&self, room: &RoomId, envelope: &SignalEnvelope) -> Result<(), TransportError> {
        let text = serde_json::to_string(envelope).map_err(|e| TransportError::Encode(e.to_string()))?;
        let mut hub = self.hub.lock().unwrap();
        if !hub.members.contains_key(&self.member) {
            return Err(TransportError::Closed);
        }
        let recipients: Vec<u64> = hub
            .members
            .iter()
            .filter(|(_, m)| m.groups.contains(room))
            .map(|(id, _)| *id)
            .collect();
        for recipient in recipients {
            hub.next_seq += 1;
            let seq = hub.next_seq;
            hub.queues
                .entry((self.member, recipient))
                .or_default()
                .push_back((seq, text.clone()));
        }
        hub.sent.push(envelope.clone());
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.lock().unwrap().members.remove(&self.member);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------
// Peer connections
// ----------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    senders: HashMap<TrackKind, String>,
    offers: usize,
    answers: usize,
    rollbacks: usize,
    remote: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    closed: bool,
}

/// In-memory connection that reports `Connected` once an offer/answer
/// exchange completes and emits one local candidate per description
pub struct FakePeerConnection {
    context: PeerContext,
    state: Mutex<FakeState>,
}

impl FakePeerConnection {
    fn emit(&self, event: PeerEvent) {
        let _ = self.context.events.send(event);
    }

    fn emit_state(&self, state: ConnectionState) {
        self.emit(PeerEvent::StateChanged {
            peer: self.context.remote.clone(),
            connection: self.context.connection,
            state,
        });
    }

    fn emit_candidate(&self, n: usize) {
        self.emit(PeerEvent::LocalCandidate {
            peer: self.context.remote.clone(),
            connection: self.context.connection,
            candidate: IceCandidate {
                candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.1 {} typ host", n, 50000 + n),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        });
    }

    /// Stand-in SDP listing the kinds being sent
    fn describe(&self, state: &FakeState, label: &str, n: usize) -> String {
        let mut kinds: Vec<&str> = state
            .senders
            .keys()
            .map(|kind| match kind {
                TrackKind::Audio => "audio",
                TrackKind::Video => "video",
            })
            .collect();
        kinds.sort_unstable();
        format!(
            "{} {}->{} #{} [{}]",
            label,
            self.context.local,
            self.context.remote,
            n,
            kinds.join(",")
        )
    }

    pub fn sending(&self, kind: TrackKind) -> Option<String> {
        self.state.lock().unwrap().senders.get(&kind).cloned()
    }

    pub fn offers(&self) -> usize {
        self.state.lock().unwrap().offers
    }

    pub fn answers(&self) -> usize {
        self.state.lock().unwrap().answers
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    pub fn candidates(&self) -> usize {
        self.state.lock().unwrap().candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), PeerError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(PeerError::Closed);
        }
        state.senders.insert(track.kind(), track.id().to_string());
        Ok(())
    }

    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<bool, PeerError> {
        let mut state = self.state.lock().unwrap();
        if !state.senders.contains_key(&TrackKind::Video) {
            return Ok(false);
        }
        match track {
            Some(track) => state.senders.insert(TrackKind::Video, track.id().to_string()),
            None => state.senders.insert(TrackKind::Video, String::new()),
        };
        Ok(true)
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let (sdp, n) = {
            let mut state = self.state.lock().unwrap();
            state.offers += 1;
            let n = state.offers;
            (self.describe(&state, "offer", n), n)
        };
        self.emit_candidate(n);
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let (sdp, n) = {
            let mut state = self.state.lock().unwrap();
            state.answers += 1;
            let n = state.answers;
            (self.describe(&state, "answer", n), n)
        };
        self.emit_candidate(100 + n);
        self.emit_state(ConnectionState::Connected);
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        let is_answer = description.kind == SdpKind::Answer;
        self.state.lock().unwrap().remote.push(description);
        if is_answer {
            self.emit_state(ConnectionState::Connected);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), PeerError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.state.lock().unwrap().candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Records every connection it creates, keyed by (local, remote)
#[derive(Default)]
pub struct FakePeerFactory {
    created: Mutex<Vec<Arc<FakePeerConnection>>>,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latest connection `local` opened towards `remote`
    pub fn connection(&self, local: &str, remote: &str) -> Arc<FakePeerConnection> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.context.local.as_str() == local && c.context.remote.as_str() == remote)
            .cloned()
            .unwrap_or_else(|| panic!("no connection from {} to {}", local, remote))
    }

    /// How many connections `local` ever opened towards `remote`
    pub fn created_between(&self, local: &str, remote: &str) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.context.local.as_str() == local && c.context.remote.as_str() == remote)
            .count()
    }

    pub fn total_created(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, context: PeerContext) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let connection = Arc::new(FakePeerConnection {
            context,
            state: Mutex::new(FakeState::default()),
        });
        self.created.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

// ----------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------

pub fn tokens() -> StaticTokenProvider {
    StaticTokenProvider::new("memory://relay", None)
}

/// Join the shared room through `relay`
pub async fn join(session: &mut Session, relay: &TestRelay) {
    session
        .join(Arc::new(relay.clone()), Arc::new(tokens()))
        .await
        .unwrap();
}

/// Session with immediate discovery; `id` is capitalised for the display name
pub fn session(id: &str, factory: &Arc<FakePeerFactory>) -> Session {
    let mut name = id.to_string();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    Session::new(
        Identity::new(id, name, Role::Attendee),
        RoomId::new(ROOM),
        SessionSettings {
            discovery_delay: Duration::ZERO,
            ..Default::default()
        },
        Arc::new(SyntheticMediaDevices::new()),
        factory.clone(),
    )
}

/// Deliver and process until nothing is queued anywhere
pub async fn settle(relay: &TestRelay, sessions: &mut [Session], delivery: &mut Delivery) {
    for _ in 0..100_000 {
        let mut handled = 0;
        for session in sessions.iter_mut() {
            handled += session.process_pending().await;
        }
        if relay.deliver_next(delivery) {
            continue;
        }
        if handled == 0 {
            return;
        }
    }
    panic!("sessions did not settle, {} envelopes still queued", relay.pending());
}

/// Every other participant id in `sessions`, sorted
pub fn others(sessions: &[Session], local: &ParticipantId) -> Vec<ParticipantId> {
    let mut ids: Vec<ParticipantId> = sessions
        .iter()
        .filter(|s| !s.has_left())
        .map(|s| s.local_id().clone())
        .filter(|id| id != local)
        .collect();
    ids.sort();
    ids
}
