//! Configuration management
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables such as `MESHMEET__ROOM__ID=standup`.

use crate::application::SessionSettings;
use crate::domain::shared::{Identity, Role, RoomId};
use crate::infrastructure::media::MediaConstraints;
use crate::infrastructure::peer::IceServer;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

pub const ENV_PREFIX: &str = "MESHMEET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub room: RoomConfig,
    pub relay: RelayConfig,
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Client URL issued for the hub, token included
    pub url: String,
    pub access_token: Option<String>,
    /// Prepended to the room id to form the relay group name; envelopes
    /// carry the bare room id
    pub group_prefix: String,
    pub ack_timeout_ms: u64,
    /// Wait before rejoining after the relay drops us; 0 disables rejoining
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Request a microphone
    pub audio: bool,
    /// Request a camera
    pub video: bool,
    pub start_muted: bool,
    pub start_video_off: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub discovery_delay_ms: u64,
    pub speaking_threshold: f32,
    pub speaking_hold_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: "Guest".to_string(),
            role: Role::Attendee,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            id: "lobby".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: None,
            group_prefix: String::new(),
            ack_timeout_ms: 10_000,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            start_muted: false,
            start_video_off: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_delay_ms: 1000,
            speaking_threshold: 0.05,
            speaking_hold_ms: 750,
        }
    }
}

impl AppConfig {
    /// Load from `path` (if given) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, Environment::with_prefix(ENV_PREFIX).separator("__"))
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn identity(&self) -> Identity {
        Identity::new(
            self.identity.id.as_str(),
            self.identity.display_name.as_str(),
            self.identity.role,
        )
    }

    /// Room id as carried in every envelope
    pub fn room_id(&self) -> RoomId {
        RoomId::new(self.room.id.as_str())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.ack_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.relay.reconnect_delay_ms > 0).then(|| Duration::from_millis(self.relay.reconnect_delay_ms))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            discovery_delay: Duration::from_millis(self.session.discovery_delay_ms),
            media: MediaConstraints {
                audio: self.media.audio,
                video: self.media.video,
            },
            start_muted: self.media.start_muted,
            start_video_off: self.media.start_video_off,
            speaking_threshold: self.session.speaking_threshold,
            speaking_hold: Duration::from_millis(self.session.speaking_hold_ms),
        }
    }
}
