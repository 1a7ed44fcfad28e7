//! Signaling gateway connection commands.
//!
//! Establishes the WebSocket transport and the [`VoiceCore`] on top of it.
//! Authentication (acquiring `token`) is the frontend's concern, per the
//! signaling transport's external-interface contract; this crate only
//! consumes a server URL and a bearer token.

use std::sync::Arc;

use tauri::{command, AppHandle, State};
use tracing::info;

use crate::session::turn::NoTurnProvider;
use crate::session::VoiceCore;
use crate::signaling::transport::{ConnectionStatus, SignalingTransport, WebSocketTransport};
use crate::{forward_notification, AppState};

#[command]
pub async fn connect_voice_gateway(
    server_url: String,
    token: String,
    local_user_id: String,
    app: AppHandle,
    state: State<'_, AppState>,
) -> Result<(), String> {
    info!(server_url = %server_url, "connecting voice gateway");

    let transport = Arc::new(WebSocketTransport::connect(server_url, token).await);

    let app_for_notify = app.clone();
    let core = VoiceCore::new(
        transport.clone() as Arc<dyn SignalingTransport>,
        Arc::new(NoTurnProvider),
        local_user_id,
        Box::new(move |notification| forward_notification(&app_for_notify, notification)),
    )
    .map_err(|e| e.to_string())?;
    core.start().await;

    *state.transport.write().await = Some(transport);
    *state.core.write().await = Some(core);
    Ok(())
}

#[command]
pub async fn disconnect_voice_gateway(state: State<'_, AppState>) -> Result<(), String> {
    info!("disconnecting voice gateway");

    if let Some(core) = state.core.write().await.take() {
        let _ = core.leave_voice().await;
    }
    if let Some(transport) = state.transport.write().await.take() {
        transport.disconnect().await;
    }
    Ok(())
}

#[command]
pub async fn voice_gateway_status(state: State<'_, AppState>) -> Result<ConnectionStatus, String> {
    match state.transport.read().await.as_ref() {
        Some(transport) => Ok(transport.status().await),
        None => Ok(ConnectionStatus::Disconnected),
    }
}
