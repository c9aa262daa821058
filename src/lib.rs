//! MeshMeet - real-time multi-party conferencing core built with Rust
//!
//! Every participant holds a direct WebRTC connection to every other
//! participant; a group-messaging relay carries only signaling. The crate
//! follows a layered Domain-Driven Design layout:
//! - `domain`: roster, envelopes, chat, participants
//! - `infrastructure`: media capture, peer connections, relay transports
//! - `application`: the session façade driving all of the above

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{Session, SessionError, SessionHandle, SessionSettings, SessionSnapshot};
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
