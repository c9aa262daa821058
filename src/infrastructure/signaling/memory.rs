//! In-process group relay
//!
//! Behaves like the hosted relay as seen from a client: every published
//! envelope goes through the JSON codec and is delivered to every member of
//! the group, the sender included.

use super::{
    RelayConnection, RelayConnector, RelayCredential, SignalingTransport, TransportError,
    TransportEvent,
};
use crate::domain::envelope::SignalEnvelope;
use crate::domain::shared::RoomId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

struct Member {
    groups: HashSet<RoomId>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct Hub {
    next_member: u64,
    members: HashMap<u64, Member>,
}

/// Shared relay; clones talk to the same hub
#[derive(Clone, Default)]
pub struct MemoryRelay {
    hub: Arc<Mutex<Hub>>,
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member_count(&self) -> usize {
        lock(&self.hub).members.len()
    }

    /// Drop every client as if the relay went away
    pub fn shutdown(&self, reason: &str) {
        let members: Vec<Member> = lock(&self.hub).members.drain().map(|(_, m)| m).collect();
        for member in members {
            let _ = member.events.send(TransportEvent::Disconnected {
                reason: Some(reason.to_string()),
            });
        }
    }
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    async fn connect(&self, _credential: &RelayCredential) -> Result<RelayConnection, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let member = {
            let mut hub = lock(&self.hub);
            hub.next_member += 1;
            let id = hub.next_member;
            hub.members.insert(
                id,
                Member {
                    groups: HashSet::new(),
                    events: tx.clone(),
                },
            );
            id
        };
        let _ = tx.send(TransportEvent::Connected {
            connection_id: Some(format!("memory-{}", member)),
        });

        let transport = MemoryTransport {
            hub: self.hub.clone(),
            member,
            connected: AtomicBool::new(true),
        };
        Ok(RelayConnection {
            transport: Arc::new(transport),
            events: rx,
        })
    }
}

/// One client's connection to a `MemoryRelay`
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
    member: u64,
    connected: AtomicBool,
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn join_group(&self, room: &RoomId) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        let member = hub.members.get_mut(&self.member).ok_or(TransportError::Closed)?;
        member.groups.insert(room.clone());
        Ok(())
    }

    fn send(&self, room: &RoomId, envelope: &SignalEnvelope) -> Result<(), TransportError> {
        let text = serde_json::to_string(envelope).map_err(|e| TransportError::Encode(e.to_string()))?;
        let hub = lock(&self.hub);
        if !hub.members.contains_key(&self.member) {
            return Err(TransportError::Closed);
        }
        for member in hub.members.values().filter(|m| m.groups.contains(room)) {
            let event = match serde_json::from_str::<SignalEnvelope>(&text) {
                Ok(envelope) => TransportEvent::Envelope(envelope),
                Err(e) => TransportEvent::Malformed(e.to_string()),
            };
            let _ = member.events.send(event);
        }
        debug!("Relayed {} to group {}", envelope.kind(), room);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(member) = lock(&self.hub).members.remove(&self.member) {
            let _ = member.events.send(TransportEvent::Disconnected { reason: None });
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && lock(&self.hub).members.contains_key(&self.member)
    }
}
