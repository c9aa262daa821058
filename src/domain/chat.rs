/// In-room chat log
use crate::domain::shared::ParticipantId;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Chat message as shown to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub from_id: ParticipantId,
    pub sender_name: String,
    pub text: String,
    /// Sender clock; ordering in the log is by local arrival
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(from_id: ParticipantId, sender_name: String, text: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            from_id,
            sender_name,
            text,
            timestamp,
        }
    }

    /// Convert a wire timestamp in epoch milliseconds, falling back to now
    pub fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }
}

/// Append-only log, ordered by local arrival
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Normalise outgoing chat text; `None` for blank input
pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_is_rejected() {
        assert_eq!(normalize_text("   \n\t"), None);
        assert_eq!(normalize_text(""), None);
        assert_eq!(normalize_text("  hello "), Some("hello".to_string()));
    }

    #[test]
    fn test_log_keeps_arrival_order() {
        let mut log = ChatLog::new();
        let later = ChatMessage::timestamp_from_millis(2_000);
        let earlier = ChatMessage::timestamp_from_millis(1_000);

        log.push(ChatMessage::new("a".into(), "A".into(), "second".into(), later));
        log.push(ChatMessage::new("b".into(), "B".into(), "first".into(), earlier));

        let texts: Vec<&str> = log.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
    }

    #[test]
    fn test_invalid_timestamp_falls_back() {
        let ts = ChatMessage::timestamp_from_millis(i64::MAX);
        assert!(ts.timestamp() > 0);
    }
}
