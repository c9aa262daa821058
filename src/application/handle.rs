//! Session task and its handle
//!
//! The session runs as a single task; callers talk to it through a cloneable
//! `SessionHandle` and observe it through a `watch` channel.

use super::error::SessionError;
use super::session::Session;
use super::snapshot::SessionSnapshot;
use crate::domain::shared::ParticipantId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Operations accepted by the session task
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartMedia,
    ToggleMute,
    ToggleVideo,
    ToggleHandRaise,
    SendChat(String),
    ToggleScreenShare,
    ReportAudioLevel { participant: ParticipantId, level: f32 },
    Reconnect,
    Leave,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<bool, SessionError>>,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Request>,
    state: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Request camera and microphone; the result shows up in the snapshot
    pub async fn start_media(&self) -> Result<(), SessionError> {
        self.call(Command::StartMedia).await.map(|_| ())
    }

    /// Returns whether we are now muted
    pub async fn toggle_mute(&self) -> Result<bool, SessionError> {
        self.call(Command::ToggleMute).await
    }

    /// Returns whether video is now on
    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        self.call(Command::ToggleVideo).await
    }

    pub async fn toggle_hand_raise(&self) -> Result<bool, SessionError> {
        self.call(Command::ToggleHandRaise).await
    }

    /// Returns false when the text was blank and nothing was sent
    pub async fn send_chat_message(&self, text: impl Into<String>) -> Result<bool, SessionError> {
        self.call(Command::SendChat(text.into())).await
    }

    pub async fn toggle_screen_share(&self) -> Result<bool, SessionError> {
        self.call(Command::ToggleScreenShare).await
    }

    pub async fn report_audio_level(
        &self,
        participant: ParticipantId,
        level: f32,
    ) -> Result<bool, SessionError> {
        self.call(Command::ReportAudioLevel { participant, level }).await
    }

    /// Re-run the relay connect sequence, e.g. after the relay dropped us
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.call(Command::Reconnect).await.map(|_| ())
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        self.call(Command::Leave).await.map(|_| ())
    }

    async fn call(&self, command: Command) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}

impl Session {
    /// Move the session onto its own task
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(32);
        let handle = SessionHandle {
            commands,
            state: self.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        info!("Session task started for {} in room {}", self.local_id(), self.room());
        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        info!("All session handles dropped, leaving room {}", self.room());
                        let _ = self.leave().await;
                        break;
                    };
                    let leaving = command == Command::Leave;
                    let result = self.execute(command).await;
                    let _ = reply.send(result);
                    if leaving {
                        break;
                    }
                }
                input = self.next_input() => {
                    self.handle_input(input).await;
                }
            }
        }
        debug!("Session task for {} finished", self.local_id());
    }

    async fn execute(&mut self, command: Command) -> Result<bool, SessionError> {
        match command {
            Command::StartMedia => {
                self.start_media_in_background();
                Ok(true)
            }
            Command::ToggleMute => Ok(self.toggle_mute()),
            Command::ToggleVideo => self.toggle_video().await,
            Command::ToggleHandRaise => Ok(self.toggle_hand_raise()),
            Command::SendChat(text) => Ok(self.send_chat_message(&text)),
            Command::ToggleScreenShare => self.toggle_screen_share().await,
            Command::ReportAudioLevel { participant, level } => {
                Ok(self.report_audio_level(&participant, level))
            }
            Command::Reconnect => self.reconnect().await.map(|_| true),
            Command::Leave => self.leave().await.map(|_| true),
        }
    }
}
