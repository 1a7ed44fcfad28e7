//! Voice session commands.
//!
//! Thin delegation layer over [`crate::session::VoiceCore`]; all of the
//! mesh/signaling/device logic lives there.

use tauri::{command, State};
use tracing::{debug, info};

use crate::audio::AudioDeviceList;
use crate::device;
use crate::session::state::VoiceMode;
use crate::session::{VoiceSessionSnapshot, VoiceCore};
use crate::stats::StatsSnapshot;
use crate::AppState;

async fn core(state: &State<'_, AppState>) -> Result<std::sync::Arc<VoiceCore>, String> {
    state.core.read().await.clone().ok_or_else(|| "voice gateway not connected".to_string())
}

#[command]
pub async fn join_voice(channel_id: String, state: State<'_, AppState>) -> Result<(), String> {
    info!(channel_id = %channel_id, "joining voice channel");
    core(&state).await?.join_voice(channel_id).await.map_err(|e| e.to_string())
}

#[command]
pub async fn leave_voice(state: State<'_, AppState>) -> Result<(), String> {
    info!("leaving voice channel");
    core(&state).await?.leave_voice().await.map_err(|e| e.to_string())
}

#[command]
pub async fn set_mute(muted: bool, state: State<'_, AppState>) -> Result<(), String> {
    debug!(muted, "setting mute");
    core(&state).await?.set_mute(muted).await.map_err(|e| e.to_string())
}

#[command]
pub async fn set_deafen(deafened: bool, state: State<'_, AppState>) -> Result<(), String> {
    debug!(deafened, "setting deafen");
    core(&state).await?.set_deafen(deafened).await.map_err(|e| e.to_string())
}

#[command]
pub async fn set_voice_mode(mode: VoiceMode, state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.set_voice_mode(mode).await;
    Ok(())
}

#[command]
pub async fn set_ptt_active(active: bool, state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.set_ptt_active(active).await;
    Ok(())
}

#[command]
pub async fn set_input_sensitivity(sensitivity: f32, state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.set_input_sensitivity(sensitivity).await;
    Ok(())
}

#[command]
pub async fn set_user_volume(peer_id: String, pct: u32, state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.set_user_volume(&peer_id, pct).await;
    Ok(())
}

#[command]
pub async fn moderate_voice_state(
    target_user_id: String,
    muted: bool,
    deafened: bool,
    state: State<'_, AppState>,
) -> Result<(), String> {
    core(&state).await?.moderate_voice_state(target_user_id, muted, deafened).await.map_err(|e| e.to_string())
}

#[command]
pub async fn get_voice_snapshot(state: State<'_, AppState>) -> Result<VoiceSessionSnapshot, String> {
    Ok(core(&state).await?.snapshot().await)
}

#[command]
pub async fn get_voice_stats(state: State<'_, AppState>) -> Result<Option<StatsSnapshot>, String> {
    Ok(core(&state).await?.stats().await)
}

/// Enumerate audio devices. Does not require an active gateway connection.
#[command]
pub async fn get_audio_devices() -> Result<AudioDeviceList, String> {
    let host = cpal::default_host();
    let inputs = device::enumerate_input_devices(&host).map_err(|e| e.to_string())?;
    let outputs = device::enumerate_output_devices(&host).map_err(|e| e.to_string())?;
    Ok(AudioDeviceList { inputs, outputs })
}

#[command]
pub async fn set_input_device(device_id: Option<String>, state: State<'_, AppState>) -> Result<(), String> {
    info!(device_id = ?device_id, "setting input device");
    core(&state).await?.set_input_device(device_id).await.map_err(|e| e.to_string())
}

#[command]
pub async fn set_output_device(device_id: Option<String>, state: State<'_, AppState>) -> Result<(), String> {
    info!(device_id = ?device_id, "setting output device");
    core(&state).await?.set_output_device(device_id).await.map_err(|e| e.to_string())
}

#[command]
pub async fn start_mic_test(device_id: Option<String>, state: State<'_, AppState>) -> Result<(), String> {
    info!("starting mic test");
    core(&state).await?.local_media.microphone.audio().lock().await.start_mic_test(device_id).await.map_err(|e| e.to_string())
}

#[command]
pub async fn stop_mic_test(state: State<'_, AppState>) -> Result<(), String> {
    core(&state).await?.local_media.microphone.audio().lock().await.stop_mic_test().await;
    Ok(())
}

#[command]
pub async fn get_mic_level(state: State<'_, AppState>) -> Result<u8, String> {
    Ok(core(&state).await?.local_media.microphone.audio().lock().await.get_mic_test_level())
}
