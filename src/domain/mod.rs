//! Domain layer - room state that is independent of transports and media backends
//!
//! This layer contains:
//! - Participants and the roster that merges discovery messages by id
//! - The signaling envelope and its wire codec
//! - Chat log and speaking indicator

pub mod chat;
pub mod envelope;
pub mod participant;
pub mod roster;
pub mod shared;
pub mod speaking;

// Re-export commonly used types
pub use shared::{DomainError, Result};
