/// Roster - the locally maintained, eventually-consistent participant list
///
/// Participants are keyed by id only. Every discovery path (`user-joined`,
/// `participant-info`, a requester's info, an inbound offer or track) merges
/// into the same entry, so duplicate or reordered delivery never changes the
/// roster size.
///
/// Ids that left stay remembered as departed until they announce
/// themselves again, so a late offer from them cannot re-create an entry.
use crate::domain::envelope::{ParticipantInfo, StateUpdate};
use crate::domain::participant::{Participant, PeerPhase, RemoteTrackInfo, RemoteStream};
use crate::domain::shared::{Identity, ParticipantId, Role};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Result of merging a discovery message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First time this id is seen
    Added,
    /// A placeholder created from media/offer received its metadata
    Completed,
    /// Already known, nothing changed
    AlreadyKnown,
    /// The message described the local participant
    IgnoredSelf,
}

impl MergeOutcome {
    /// Whether the participant was not fully known before
    pub fn is_new(&self) -> bool {
        matches!(self, MergeOutcome::Added | MergeOutcome::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct Roster {
    local_id: ParticipantId,
    participants: HashMap<ParticipantId, Participant>,
    departed: HashSet<ParticipantId>,
}

impl Roster {
    /// Create a roster containing only the local participant
    pub fn new(identity: &Identity) -> Self {
        let local = Participant::local(identity);
        let mut participants = HashMap::new();
        participants.insert(local.id.clone(), local);
        Self {
            local_id: identity.id.clone(),
            participants,
            departed: HashSet::new(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn local(&self) -> &Participant {
        // The local entry is inserted at construction and never removed.
        &self.participants[&self.local_id]
    }

    pub fn local_mut(&mut self) -> &mut Participant {
        self.participants
            .get_mut(&self.local_id)
            .unwrap_or_else(|| unreachable!("local participant is never removed"))
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Ids of every non-local participant
    pub fn remote_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .keys()
            .filter(|id| **id != self.local_id)
            .cloned()
            .collect()
    }

    /// Idempotent merge of a participant's self-description
    pub fn merge(&mut self, id: &ParticipantId, info: &ParticipantInfo) -> MergeOutcome {
        if *id == self.local_id {
            return MergeOutcome::IgnoredSelf;
        }
        self.readmit(id);

        match self.participants.get_mut(id) {
            Some(existing) if existing.is_placeholder => {
                existing.complete(info);
                existing.is_stale = false;
                debug!("Completed placeholder participant {} as {}", id, info.name);
                MergeOutcome::Completed
            }
            Some(existing) => {
                existing.is_stale = false;
                MergeOutcome::AlreadyKnown
            }
            None => {
                self.participants
                    .insert(id.clone(), Participant::announced(id.clone(), info));
                debug!("Added participant {} ({})", id, info.name);
                MergeOutcome::Added
            }
        }
    }

    /// Create a placeholder if `id` is unknown; returns whether one was created
    pub fn ensure(&mut self, id: &ParticipantId) -> bool {
        if *id == self.local_id || self.participants.contains_key(id) {
            return false;
        }
        self.participants
            .insert(id.clone(), Participant::minimal(id.clone()));
        debug!("Added placeholder participant {}", id);
        true
    }

    /// Merge a partial state update; unknown ids are ignored
    pub fn apply_state_update(&mut self, id: &ParticipantId, update: &StateUpdate) -> bool {
        if *id == self.local_id {
            return false;
        }
        match self.participants.get_mut(id) {
            Some(participant) => {
                participant.apply(update);
                true
            }
            None => false,
        }
    }

    pub fn set_phase(&mut self, id: &ParticipantId, phase: PeerPhase) {
        if *id == self.local_id {
            return;
        }
        if let Some(participant) = self.participants.get_mut(id) {
            participant.phase = phase;
        }
    }

    pub fn phase(&self, id: &ParticipantId) -> PeerPhase {
        self.participants
            .get(id)
            .map(|p| p.phase)
            .unwrap_or(PeerPhase::Unknown)
    }

    /// Attach an inbound track, creating a placeholder participant if needed
    pub fn attach_track(&mut self, id: &ParticipantId, stream_id: &str, track: RemoteTrackInfo) {
        if *id == self.local_id {
            return;
        }
        self.ensure(id);
        if let Some(participant) = self.participants.get_mut(id) {
            let stream = participant.stream.get_or_insert_with(|| RemoteStream {
                stream_id: stream_id.to_string(),
                tracks: Vec::new(),
            });
            stream.upsert(track);
        }
    }

    pub fn set_screen_sharing(&mut self, id: &ParticipantId, sharing: bool) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) if !participant.is_local => {
                participant.is_screen_sharing = sharing;
                true
            }
            _ => false,
        }
    }

    /// Returns whether the flag changed
    pub fn set_speaking(&mut self, id: &ParticipantId, speaking: bool) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) if participant.is_speaking != speaking => {
                participant.is_speaking = speaking;
                true
            }
            _ => false,
        }
    }

    /// Flag every remote participant as stale after losing the relay
    pub fn mark_remote_stale(&mut self) {
        for participant in self.participants.values_mut() {
            if !participant.is_local {
                participant.is_stale = true;
            }
        }
    }

    /// Clear the stale flag once a participant is heard from again
    pub fn refresh(&mut self, id: &ParticipantId) {
        if let Some(participant) = self.participants.get_mut(id) {
            participant.is_stale = false;
        }
    }

    /// Whether `id` left and has not announced itself since
    pub fn has_departed(&self, id: &ParticipantId) -> bool {
        self.departed.contains(id)
    }

    /// Forget that `id` departed; returns whether it had
    pub fn readmit(&mut self, id: &ParticipantId) -> bool {
        self.departed.remove(id)
    }

    /// Remove a remote participant and remember it as departed; the local
    /// entry cannot be removed
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        if *id == self.local_id {
            return None;
        }
        self.departed.insert(id.clone());
        self.participants.remove(id).map(|mut participant| {
            participant.phase = PeerPhase::Left;
            participant
        })
    }

    /// Remove every remote participant
    pub fn clear_remote(&mut self) {
        let local_id = self.local_id.clone();
        let departed = &mut self.departed;
        self.participants.retain(|id, _| {
            if *id == local_id {
                return true;
            }
            departed.insert(id.clone());
            false
        });
    }

    pub fn display_name(&self, id: &ParticipantId) -> Option<&str> {
        self.participants
            .get(id)
            .filter(|p| !p.is_placeholder)
            .map(|p| p.name.as_str())
    }

    /// Participants for presentation: local first, then hosts, then others
    pub fn sorted(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(presentation_order);
        list
    }
}

fn presentation_order(a: &Participant, b: &Participant) -> Ordering {
    fn rank(p: &Participant) -> u8 {
        match (p.is_local, p.role) {
            (true, _) => 0,
            (false, Role::Host) => 1,
            (false, Role::Attendee) => 2,
        }
    }

    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.id.cmp(&b.id))
}
