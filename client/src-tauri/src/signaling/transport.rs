//! Signaling transport: the bidirectional, reliable, ordered channel the
//! voice core consumes (spec'd as an external interface) plus a concrete
//! WebSocket implementation grounded in the teacher's
//! `network/websocket.rs::WebSocketManager` — same reconnect/backoff loop,
//! generalized from the teacher's chat+voice event set down to the voice
//! signaling surface this crate owns.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::consts::{RECONNECT_BACKOFF_BASE_SECS, RECONNECT_BACKOFF_MAX};

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("transport send failed: {0}")]
    SendFailed(String),
    #[error("not connected")]
    NotConnected,
}

/// Messages the core sends to the signaling server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinVoiceChannel {
        channel_id: String,
        muted: bool,
        deafened: bool,
    },
    LeaveVoiceChannel {
        channel_id: String,
    },
    SendSignal {
        target_user_id: String,
        payload: serde_json::Value,
    },
    ModerateVoiceState {
        target_user_id: String,
        muted: bool,
        deafened: bool,
    },
    UpdateVoiceState {
        muted: bool,
        deafened: bool,
    },
    NotifyScreenShare {
        channel_id: String,
        active: bool,
    },
    NotifyCamera {
        channel_id: String,
        active: bool,
    },
    RequestWatchStream {
        sharer_id: String,
    },
    StopWatchingStream {
        sharer_id: String,
    },
    VoiceHeartbeat,
    GetVoiceChannelUsers {
        channel_id: String,
    },
}

/// Events the core receives from the signaling server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingEvent {
    UserJoinedVoice {
        user_id: String,
        display_name: String,
    },
    UserLeftVoice {
        user_id: String,
    },
    ReceiveSignal {
        from_user_id: String,
        payload: serde_json::Value,
    },
    VoiceChannelUsers {
        participants: HashMap<String, String>,
    },
    ActiveSharers {
        sharers: HashMap<String, String>,
    },
    ScreenShareStarted {
        user_id: String,
        display_name: String,
    },
    ScreenShareStopped {
        user_id: String,
    },
    CameraStarted {
        user_id: String,
        display_name: String,
    },
    CameraStopped {
        user_id: String,
    },
    ActiveCameras {
        cameras: HashMap<String, String>,
    },
    WatchStreamRequested {
        viewer_id: String,
    },
    StopWatchingRequested {
        viewer_id: String,
    },
    VoiceSessionReplaced {
        reason: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Transport-level lifecycle signal, not a server message: the
    /// connection just came back up after a drop.
    TransportReconnected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// The voice core's view of the signaling connection. Implementations
/// only need to deliver `ClientEvent`s reliably and in order, and push
/// `SignalingEvent`s back through [`Self::take_event_receiver`].
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<(), SignalingError>;

    async fn status(&self) -> ConnectionStatus;

    /// Takes ownership of the event receiver. Must be called exactly once
    /// (by the session controller, at construction); returns `None` on
    /// subsequent calls.
    async fn take_event_receiver(&self) -> Option<mpsc::Receiver<SignalingEvent>>;
}

/// Concrete WebSocket-backed transport.
pub struct WebSocketTransport {
    tx: mpsc::Sender<ClientEvent>,
    status: std::sync::Arc<RwLock<ConnectionStatus>>,
    event_rx: Mutex<Option<mpsc::Receiver<SignalingEvent>>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl WebSocketTransport {
    pub async fn connect(server_url: String, token: String) -> Self {
        let (client_tx, client_rx) = mpsc::channel::<ClientEvent>(128);
        let (event_tx, event_rx) = mpsc::channel::<SignalingEvent>(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let status = std::sync::Arc::new(RwLock::new(ConnectionStatus::Connecting));

        let status_clone = status.clone();
        tokio::spawn(async move {
            connection_loop(
                server_url,
                token,
                client_rx,
                event_tx,
                shutdown_rx,
                status_clone,
            )
            .await;
        });

        Self {
            tx: client_tx,
            status,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    pub async fn disconnect(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        self.tx
            .send(event)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    async fn take_event_receiver(&self) -> Option<mpsc::Receiver<SignalingEvent>> {
        self.event_rx.lock().await.take()
    }
}

async fn connection_loop(
    server_url: String,
    token: String,
    mut client_rx: mpsc::Receiver<ClientEvent>,
    event_tx: mpsc::Sender<SignalingEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    status: std::sync::Arc<RwLock<ConnectionStatus>>,
) {
    let mut attempt = 0u32;
    let mut ever_connected = false;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("signaling transport shutdown requested");
            *status.write().await = ConnectionStatus::Disconnected;
            return;
        }

        let ws_url = build_ws_url(&server_url, &token);
        if attempt > 0 {
            *status.write().await = ConnectionStatus::Reconnecting { attempt };
        } else {
            *status.write().await = ConnectionStatus::Connecting;
        }

        match connect_async(&ws_url).await {
            Ok((ws_stream, _)) => {
                info!("signaling transport connected");
                attempt = 0;
                *status.write().await = ConnectionStatus::Connected;

                if ever_connected {
                    let _ = event_tx.send(SignalingEvent::TransportReconnected).await;
                }
                ever_connected = true;

                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    dispatch_server_message(&text, &event_tx).await;
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        warn!("failed to send pong: {}", e);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    info!("signaling connection closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("signaling transport error: {}", e);
                                    break;
                                }
                                _ => {}
                            }
                        }

                        event = client_rx.recv() => {
                            match event {
                                Some(ev) => {
                                    if let Ok(json) = serde_json::to_string(&ev) {
                                        debug!(payload = %json, "sending signal");
                                        if let Err(e) = write.send(Message::Text(json)).await {
                                            error!("failed to send signal: {}", e);
                                            break;
                                        }
                                    }
                                }
                                None => {
                                    info!("client event channel closed");
                                    *status.write().await = ConnectionStatus::Disconnected;
                                    return;
                                }
                            }
                        }

                        _ = shutdown_rx.recv() => {
                            let _ = write.send(Message::Close(None)).await;
                            *status.write().await = ConnectionStatus::Disconnected;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                error!("signaling transport failed to connect: {}", e);
            }
        }

        *status.write().await = ConnectionStatus::Disconnected;
        attempt += 1;
        let backoff = Duration::from_secs(RECONNECT_BACKOFF_BASE_SECS.pow(attempt.min(5)))
            .min(RECONNECT_BACKOFF_MAX);
        info!(attempt, ?backoff, "reconnecting signaling transport");

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => return,
        }
    }
}

fn build_ws_url(server_url: &str, token: &str) -> String {
    let base = server_url
        .replace("http://", "ws://")
        .replace("https://", "wss://");
    format!("{}/voice/ws?token={}", base.trim_end_matches('/'), token)
}

async fn dispatch_server_message(text: &str, event_tx: &mpsc::Sender<SignalingEvent>) {
    match serde_json::from_str::<SignalingEvent>(text) {
        Ok(event) => {
            debug!(?event, "received signaling event");
            if event_tx.send(event).await.is_err() {
                warn!("signaling event receiver dropped");
            }
        }
        Err(e) => {
            warn!("failed to parse signaling message: {} ({})", e, text);
        }
    }
}
