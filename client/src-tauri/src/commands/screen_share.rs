//! Screen share commands.
//!
//! Delegates to [`crate::media::screen::ScreenCaptureHandle`] and
//! [`crate::fanout`] via the voice core. A capture is acquired without
//! publishing to any peer; viewers opt in with `watch_stream`, which
//! triggers the per-viewer publish cycle in `fanout`.

use tauri::{command, State};
use tracing::info;

use crate::capture::CaptureSource;
use crate::media::screen::ScreenCaptureHandle;
use crate::session::VoiceCore;
use crate::AppState;

async fn core(state: &State<'_, AppState>) -> Result<std::sync::Arc<VoiceCore>, String> {
    state.core.read().await.clone().ok_or_else(|| "voice gateway not connected".to_string())
}

#[command]
pub async fn enumerate_capture_sources() -> Result<Vec<CaptureSource>, String> {
    ScreenCaptureHandle::enumerate_sources().map_err(|e| e.to_string())
}

#[command]
pub async fn start_screen_share(
    source_id: String,
    quality: String,
    state: State<'_, AppState>,
) -> Result<(), String> {
    info!(source_id = %source_id, quality = %quality, "starting screen share");
    core(&state).await?.start_screen_share(&source_id, &quality).await.map_err(|e| e.to_string())
}

#[command]
pub async fn stop_screen_share(state: State<'_, AppState>) -> Result<(), String> {
    info!("stopping screen share");
    core(&state).await?.stop_screen_share().await.map_err(|e| e.to_string())
}

#[command]
pub async fn watch_stream(sharer_id: String, state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.watch_stream(sharer_id).await.map_err(|e| e.to_string())
}

#[command]
pub async fn stop_watching(state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.stop_watching().await.map_err(|e| e.to_string())
}
