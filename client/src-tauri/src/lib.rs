//! Meshtalk Voice — native Tauri backend for the mesh voice/video core.

mod audio;
mod capture;
mod commands;
mod consts;
mod device;
mod error;
mod fanout;
mod media;
mod peer;
mod session;
mod signaling;
mod stats;
mod track_demux;
mod video;

use std::sync::Arc;

use tauri::{AppHandle, Emitter, Manager};
use tokio::sync::RwLock;

use session::VoiceCore;
use session::CoreNotification;
use signaling::transport::WebSocketTransport;

/// Application state shared across commands: the signaling transport and
/// the voice core built on top of it, both `None` until
/// `connect_voice_gateway` is called. Held separately from `VoiceCore`
/// because the commands layer needs `WebSocketTransport::disconnect`, which
/// is not part of the `SignalingTransport` trait object `VoiceCore` holds.
pub struct AppState {
    pub transport: RwLock<Option<Arc<WebSocketTransport>>>,
    pub core: RwLock<Option<Arc<VoiceCore>>>,
}

impl AppState {
    fn new() -> Self {
        Self { transport: RwLock::new(None), core: RwLock::new(None) }
    }
}

/// Re-emit a [`CoreNotification`] as a Tauri event the frontend subscribes to.
fn forward_notification(app: &AppHandle, notification: CoreNotification) {
    let (event, payload) = match notification {
        CoreNotification::ConnectionState(cs) => ("voice:connection_state", serde_json::to_value(cs)),
        CoreNotification::UserNotice { peer_id, message } => (
            "voice:user_notice",
            serde_json::to_value(serde_json::json!({"peerId": peer_id, "message": message})),
        ),
        CoreNotification::ParticipantsChanged => ("voice:participants_changed", Ok(serde_json::Value::Null)),
        CoreNotification::SpeakingChanged => ("voice:speaking_changed", Ok(serde_json::Value::Null)),
        CoreNotification::TrackUpdated { peer_id, kind } => (
            "voice:track_updated",
            serde_json::to_value(serde_json::json!({"peerId": peer_id, "kind": kind})),
        ),
        CoreNotification::SessionReplaced(reason) => ("voice:session_replaced", serde_json::to_value(reason)),
    };
    if let Ok(payload) = payload {
        let _ = app.emit(event, payload);
    }
}

/// Run the Tauri application.
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_global_shortcut::Builder::new().build())
        .setup(|app| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "meshtalk_voice=debug".into()),
                )
                .init();

            tracing::info!("meshtalk voice core starting");

            app.manage(AppState::new());

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Gateway connection
            commands::websocket::connect_voice_gateway,
            commands::websocket::disconnect_voice_gateway,
            commands::websocket::voice_gateway_status,
            // Voice session
            commands::voice::join_voice,
            commands::voice::leave_voice,
            commands::voice::set_mute,
            commands::voice::set_deafen,
            commands::voice::set_voice_mode,
            commands::voice::set_ptt_active,
            commands::voice::set_input_sensitivity,
            commands::voice::set_user_volume,
            commands::voice::moderate_voice_state,
            commands::voice::get_voice_snapshot,
            commands::voice::get_voice_stats,
            // Devices
            commands::voice::get_audio_devices,
            commands::voice::set_input_device,
            commands::voice::set_output_device,
            commands::voice::start_mic_test,
            commands::voice::stop_mic_test,
            commands::voice::get_mic_level,
            // Camera
            commands::webcam::start_camera,
            commands::webcam::stop_camera,
            commands::webcam::enumerate_webcam_devices_cmd,
            // Screen share
            commands::screen_share::enumerate_capture_sources,
            commands::screen_share::start_screen_share,
            commands::screen_share::stop_screen_share,
            commands::screen_share::watch_stream,
            commands::screen_share::stop_watching,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
