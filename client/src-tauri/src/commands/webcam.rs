//! Camera commands.
//!
//! Delegates to [`crate::media::camera::CameraHandle`] via the voice core,
//! which publishes to every existing peer on start (§4.B: camera is
//! published eagerly, unlike screen share).

use tauri::{command, State};
use tracing::info;

use crate::capture::webcam::{enumerate_webcam_devices, WebcamDevice};
use crate::AppState;

async fn core(state: &State<'_, AppState>) -> Result<std::sync::Arc<crate::session::VoiceCore>, String> {
    state.core.read().await.clone().ok_or_else(|| "voice gateway not connected".to_string())
}

#[command]
pub async fn start_camera(
    device_index: Option<u32>,
    quality: String,
    state: State<'_, AppState>,
) -> Result<(), String> {
    info!(device_index = ?device_index, quality = %quality, "starting camera");
    core(&state).await?.start_camera(device_index, &quality).await.map_err(|e| e.to_string())
}

#[command]
pub async fn stop_camera(state: State<'_, AppState>) -> Result<(), String> {
    info!("stopping camera");
    core(&state).await?.stop_camera().await.map_err(|e| e.to_string())
}

#[command]
pub async fn enumerate_webcam_devices_cmd() -> Result<Vec<WebcamDevice>, String> {
    enumerate_webcam_devices()
}
