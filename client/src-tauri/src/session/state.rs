//! Voice Session Controller data model (§3).
//!
//! One singleton per running client; lifecycle is join..leave. Per-peer
//! auxiliary state that belongs to the signaling/peer layer (senders,
//! pending candidates, ICE cooldowns) lives in [`crate::peer::PeerConnection`]
//! instead of here — this struct only holds the session-level intent and
//! the authoritative server view, mirroring the teacher's flat `VoiceState`
//! but generalized from one peer to a participant map.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    VoiceActivity,
    PushToTalk,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioProcessingOptions {
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioProcessingOptions {
    fn default() -> Self {
        Self {
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
        }
    }
}

/// A remote video stream exposed to the UI layer, tagged with a version
/// counter so subscribers can tell a replaced stream from the same one
/// still playing (§4.F: "publish a stream-version counter to invalidate
/// any subscribers"). Rendering the frames is UI-layer work and out of
/// scope here; this crate only tracks which track is current.
#[derive(Default)]
pub struct VersionedTrack {
    pub track_id: Option<String>,
    pub version: u64,
}

impl VersionedTrack {
    pub fn replace(&mut self, track_id: String) {
        self.track_id = Some(track_id);
        self.version += 1;
    }

    pub fn clear(&mut self) {
        self.track_id = None;
        self.version += 1;
    }
}

/// The session-level state described in spec §3. Owned by [`super::VoiceCore`]
/// behind a single `RwLock`, read by commands and mutated only by the
/// session controller and signaling engine.
pub struct VoiceSessionState {
    pub current_channel_id: Option<String>,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub voice_mode: VoiceMode,
    pub ptt_active: bool,
    pub input_device_id: Option<String>,
    pub output_device_id: Option<String>,
    pub camera_device_id: Option<String>,
    pub audio_processing: AudioProcessingOptions,
    pub input_sensitivity: f32,
    pub connection_state: ConnectionState,
    pub participants: HashMap<PeerId, String>,
    pub active_sharers: HashMap<PeerId, String>,
    pub active_cameras: HashMap<PeerId, String>,
    pub watching_user_id: Option<PeerId>,
    pub focused_user_id: Option<PeerId>,
    pub user_volumes: HashMap<PeerId, u32>,
    pub speaking: HashSet<PeerId>,
    pub camera_video_streams: HashMap<PeerId, VersionedTrack>,
    pub screen_video_streams: HashMap<PeerId, VersionedTrack>,

    /// Always false: there is no browser autoplay-unlock gate on this
    /// native backend. Kept for interface parity with spec §3/§11's data
    /// model (decided in the project's grounding ledger).
    pub needs_audio_unlock: bool,

    /// Set once by the transport-reconnect handler while the UI is hidden;
    /// consumed by the visibility-became-visible handler.
    pub pending_visibility_rejoin: bool,

    /// Guards the transport-reconnect and visibility handlers from racing
    /// each other into a concurrent rejoin.
    pub rejoin_in_progress: bool,

    /// Set at the end of a successful join: the device we just acquired is
    /// the desired one, so a device-hotplug reactor should skip its next
    /// reaction. No hotplug listener exists in this native build yet; kept
    /// for interface parity like [`Self::needs_audio_unlock`].
    pub suppress_device_reactor_once: bool,
}

impl Default for VoiceSessionState {
    fn default() -> Self {
        Self {
            current_channel_id: None,
            is_muted: false,
            is_deafened: false,
            voice_mode: VoiceMode::VoiceActivity,
            ptt_active: false,
            input_device_id: None,
            output_device_id: None,
            camera_device_id: None,
            audio_processing: AudioProcessingOptions::default(),
            input_sensitivity: 0.5,
            connection_state: ConnectionState::Disconnected,
            participants: HashMap::new(),
            active_sharers: HashMap::new(),
            active_cameras: HashMap::new(),
            watching_user_id: None,
            focused_user_id: None,
            user_volumes: HashMap::new(),
            speaking: HashSet::new(),
            camera_video_streams: HashMap::new(),
            screen_video_streams: HashMap::new(),
            needs_audio_unlock: false,
            pending_visibility_rejoin: false,
            rejoin_in_progress: false,
            suppress_device_reactor_once: false,
        }
    }
}

impl VoiceSessionState {
    pub fn user_volume(&self, peer_id: &str) -> u32 {
        self.user_volumes.get(peer_id).copied().unwrap_or(100)
    }

    pub fn is_in_session(&self) -> bool {
        self.current_channel_id.is_some()
    }

    /// §3 invariant: `watching_user_id` is non-null only if the referenced
    /// peer is still an active sharer.
    pub fn clear_watching_if_not_sharer(&mut self) {
        if let Some(id) = &self.watching_user_id {
            if !self.active_sharers.contains_key(id) {
                self.watching_user_id = None;
            }
        }
    }

    /// Full local reset, used on leave and on session replacement. Does not
    /// touch device selections or user-intent flags (mute/deafen/mode).
    pub fn reset_for_leave(&mut self) {
        self.current_channel_id = None;
        self.connection_state = ConnectionState::Disconnected;
        self.participants.clear();
        self.active_sharers.clear();
        self.active_cameras.clear();
        self.watching_user_id = None;
        self.speaking.clear();
        self.camera_video_streams.clear();
        self.screen_video_streams.clear();
        self.pending_visibility_rejoin = false;
        self.rejoin_in_progress = false;
    }
}
