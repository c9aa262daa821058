/// Speaking indicator
///
/// Audio levels (0.0 - 1.0) are reported per participant. A participant
/// becomes "speaking" as soon as a level crosses the threshold and stops
/// only after the level has stayed below it for the hold period, so short
/// pauses between words do not flicker the indicator.
use crate::domain::shared::ParticipantId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SpeakingDetector {
    threshold: f32,
    hold: Duration,
    last_loud: HashMap<ParticipantId, Instant>,
}

impl SpeakingDetector {
    pub fn new(threshold: f32, hold: Duration) -> Self {
        Self {
            threshold,
            hold,
            last_loud: HashMap::new(),
        }
    }

    /// Feed a level sample; returns the speaking state it implies
    pub fn observe(&mut self, id: &ParticipantId, level: f32, now: Instant) -> bool {
        if level >= self.threshold {
            self.last_loud.insert(id.clone(), now);
            return true;
        }
        match self.last_loud.get(id) {
            Some(at) if now.duration_since(*at) < self.hold => true,
            Some(_) => {
                self.last_loud.remove(id);
                false
            }
            None => false,
        }
    }

    pub fn forget(&mut self, id: &ParticipantId) {
        self.last_loud.remove(id);
    }
}

impl Default for SpeakingDetector {
    fn default() -> Self {
        Self::new(0.05, Duration::from_millis(750))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_keeps_indicator_through_pauses() {
        let mut detector = SpeakingDetector::new(0.1, Duration::from_millis(500));
        let id = ParticipantId::from("bob");
        let start = Instant::now();

        assert!(!detector.observe(&id, 0.01, start));
        assert!(detector.observe(&id, 0.4, start));
        assert!(detector.observe(&id, 0.0, start + Duration::from_millis(200)));
        assert!(!detector.observe(&id, 0.0, start + Duration::from_millis(600)));
    }
}
