//! Domain errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Unknown envelope type: {0}")]
    UnknownEnvelopeType(String),

    #[error("Invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Missing payload for {0}")]
    MissingPayload(String),

    #[error("Participant refers to itself: {0}")]
    SelfReference(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
