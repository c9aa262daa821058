//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects and infrastructure to run one
//! participant's conference session. It's responsible for:
//! - Dispatching relay envelopes and peer callbacks
//! - Local media toggles and screen sharing
//! - Publishing observable session state

pub mod error;
pub mod handle;
pub mod session;
pub mod snapshot;

pub use error::SessionError;
pub use handle::{Command, SessionHandle};
pub use session::{Input, Session, SessionSettings};
pub use snapshot::{RelayState, SessionSnapshot};
