use meshmeet::application::{RelayState, Session, SessionError};
use meshmeet::config::AppConfig;
use meshmeet::infrastructure::media::SyntheticMediaDevices;
use meshmeet::infrastructure::peer::WebRtcPeerFactory;
use meshmeet::infrastructure::signaling::{StaticTokenProvider, WebSocketRelay};
use meshmeet::infrastructure::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting MeshMeet headless participant");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    let identity = config.identity();
    let room = config.room_id();
    info!(
        "Configuration loaded: {} ({}) joining room {}",
        identity.display_name, identity.id, room
    );

    telemetry::describe_metrics();

    let factory = Arc::new(WebRtcPeerFactory::new(&config.ice.servers)?);
    let devices = Arc::new(SyntheticMediaDevices::new());
    let relay = Arc::new(WebSocketRelay::new(config.ack_timeout(), config.relay.group_prefix.clone()));
    let tokens = Arc::new(StaticTokenProvider::new(
        config.relay.url.clone(),
        config.relay.access_token.clone(),
    ));

    let mut session = Session::new(identity, room, config.session_settings(), devices, factory);
    session.join(relay, tokens).await?;

    let (handle, task) = session.spawn();
    handle.start_media().await?;

    // Log roster changes and rejoin the relay when it drops us
    let mut state = handle.subscribe();
    let reconnect_delay = config.reconnect_delay();
    let watcher_handle = handle.clone();
    let watcher = tokio::spawn(async move {
        let mut last_roster = Vec::new();
        let mut last_relay = state.borrow().relay;
        while state.changed().await.is_ok() {
            let snapshot = state.borrow_and_update().clone();
            let roster: Vec<String> = snapshot
                .participants
                .iter()
                .map(|p| format!("{}{}", p.name, if p.is_stale { " (stale)" } else { "" }))
                .collect();
            if roster != last_roster {
                info!("Participants: {}", roster.join(", "));
                last_roster = roster;
            }
            let lost = snapshot.relay == RelayState::Disconnected && last_relay == RelayState::Connected;
            last_relay = snapshot.relay;
            if !lost {
                continue;
            }
            warn!("Relay connection lost");
            let Some(delay) = reconnect_delay else {
                continue;
            };
            loop {
                tokio::time::sleep(delay).await;
                match watcher_handle.reconnect().await {
                    Ok(()) => {
                        info!("Rejoined the relay");
                        break;
                    }
                    Err(SessionError::AlreadyLeft | SessionError::SessionClosed) => return,
                    Err(e) => warn!("Rejoining the relay failed: {}", e),
                }
            }
            last_relay = state.borrow_and_update().relay;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    handle.leave().await?;
    task.await?;
    watcher.abort();

    Ok(())
}
