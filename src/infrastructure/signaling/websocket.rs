//! WebSocket group relay client
//!
//! Speaks the JSON pub/sub subprotocol of hosted group relays
//! (`json.webpubsub.azure.v1`):
//!
//! - outbound `joinGroup`, `sendToGroup`
//! - inbound `message`, `system` (`connected` / `disconnected`), `ack`
//!
//! A writer task owns the socket sink, so `send` only enqueues a frame.
//! Relay group names are the room id behind an optional prefix; envelopes
//! keep the bare room id.

use super::{
    RelayConnection, RelayConnector, RelayCredential, SignalingTransport, TransportError,
    TransportEvent,
};
use crate::domain::envelope::SignalEnvelope;
use crate::domain::shared::RoomId;
use async_trait::async_trait;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Subprotocol negotiated with the relay
pub const SUBPROTOCOL: &str = "json.webpubsub.azure.v1";

/// Client-to-relay frame
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RelayRequest<'a> {
    JoinGroup {
        group: &'a str,
        #[serde(rename = "ackId")]
        ack_id: u64,
    },
    SendToGroup {
        group: &'a str,
        #[serde(rename = "dataType")]
        data_type: &'static str,
        data: Value,
        #[serde(rename = "noEcho")]
        no_echo: bool,
    },
}

/// Relay-to-client frame
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RelayFrame {
    Message {
        #[serde(default)]
        group: Option<String>,
        #[serde(default, rename = "dataType")]
        data_type: Option<String>,
        data: Value,
    },
    System {
        event: String,
        #[serde(default, rename = "connectionId")]
        connection_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Ack {
        #[serde(rename = "ackId")]
        ack_id: u64,
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>;

/// Connector for hosted group relays
#[derive(Debug, Clone)]
pub struct WebSocketRelay {
    ack_timeout: Duration,
    group_prefix: String,
}

impl WebSocketRelay {
    pub fn new(ack_timeout: Duration, group_prefix: impl Into<String>) -> Self {
        Self {
            ack_timeout,
            group_prefix: group_prefix.into(),
        }
    }
}

impl Default for WebSocketRelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), "")
    }
}

#[async_trait]
impl RelayConnector for WebSocketRelay {
    async fn connect(&self, credential: &RelayCredential) -> Result<RelayConnection, TransportError> {
        let mut request = credential
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
        if let Some(token) = &credential.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("Relay WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("Relay writer finished");
        });

        let reader_connected = connected.clone();
        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut reason = None;
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => handle_frame(&text, &events_tx, &reader_pending),
                    Ok(Message::Close(close)) => {
                        reason = close.map(|c| c.reason.to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Relay read failed: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            if let Ok(mut pending) = reader_pending.lock() {
                pending.clear();
            }
            info!("Relay WebSocket closed: {:?}", reason);
            let _ = events_tx.send(TransportEvent::Disconnected { reason });
        });

        let transport = WebSocketTransport {
            outbound: outbound_tx,
            connected,
            pending,
            next_ack: AtomicU64::new(1),
            ack_timeout: self.ack_timeout,
            group_prefix: self.group_prefix.clone(),
        };
        Ok(RelayConnection {
            transport: Arc::new(transport),
            events: events_rx,
        })
    }
}

fn handle_frame(text: &str, events: &mpsc::UnboundedSender<TransportEvent>, pending: &PendingAcks) {
    let frame: RelayFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Unparseable relay frame: {}", e);
            return;
        }
    };

    match frame {
        RelayFrame::Message {
            group,
            data_type,
            data,
        } => {
            // Text payloads carry the envelope as a JSON string.
            let data = match data {
                Value::String(raw) => match serde_json::from_str(&raw) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = events.send(TransportEvent::Malformed(e.to_string()));
                        return;
                    }
                },
                other => other,
            };
            debug!("Relay message in group {:?} ({:?})", group, data_type);
            let event = match SignalEnvelope::from_json(data) {
                Ok(envelope) => TransportEvent::Envelope(envelope),
                Err(e) => TransportEvent::Malformed(e.to_string()),
            };
            let _ = events.send(event);
        }
        RelayFrame::System {
            event,
            connection_id,
            message,
        } => match event.as_str() {
            "connected" => {
                let _ = events.send(TransportEvent::Connected { connection_id });
            }
            "disconnected" => {
                let _ = events.send(TransportEvent::Disconnected { reason: message });
            }
            other => debug!("Ignoring relay system event {}", other),
        },
        RelayFrame::Ack {
            ack_id,
            success,
            error,
        } => {
            let waiter = pending.lock().ok().and_then(|mut p| p.remove(&ack_id));
            let outcome = if success {
                Ok(())
            } else {
                Err(error.map(|e| e.to_string()).unwrap_or_else(|| "rejected".to_string()))
            };
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(outcome);
                }
                None if !success => warn!("Relay rejected request {}: {:?}", ack_id, outcome),
                None => {}
            }
        }
        RelayFrame::Unknown => debug!("Ignoring unknown relay frame"),
    }
}

/// Client side of a relay WebSocket
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
    pending: PendingAcks,
    next_ack: AtomicU64,
    ack_timeout: Duration,
    group_prefix: String,
}

impl WebSocketTransport {
    fn group_name(&self, room: &RoomId) -> String {
        format!("{}{}", self.group_prefix, room)
    }

    fn push(&self, request: &RelayRequest<'_>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(request).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn join_group(&self, room: &RoomId) -> Result<(), TransportError> {
        let group = self.group_name(room);
        let ack_id = self.next_ack.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(ack_id, tx);
        }
        self.push(&RelayRequest::JoinGroup {
            group: &group,
            ack_id,
        })?;

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(()))) => {
                info!("Joined relay group {}", group);
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(TransportError::JoinGroup { group, reason }),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&ack_id);
                }
                Err(TransportError::Timeout(format!("ack {} for group {}", ack_id, group)))
            }
        }
    }

    fn send(&self, room: &RoomId, envelope: &SignalEnvelope) -> Result<(), TransportError> {
        let data = envelope.to_json().map_err(|e| TransportError::Encode(e.to_string()))?;
        let group = self.group_name(room);
        self.push(&RelayRequest::SendToGroup {
            group: &group,
            data_type: "json",
            data,
            no_echo: true,
        })
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Message::Close(None));
            info!("Relay WebSocket disconnect requested");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
