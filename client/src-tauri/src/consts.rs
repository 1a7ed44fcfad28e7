//! Named constants for the voice mesh core.
//!
//! A handful of these are overridable via environment variable, read once
//! at [`crate::session::VoiceCore`] construction, matching the plain
//! `std::env::var` pattern the rest of this codebase uses (no config-file
//! layer is introduced).

use std::time::Duration;

/// Default STUN server, used unless `MESHTALK_STUN_URL` is set.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Minimum spacing between ICE restarts for a given peer.
pub const ICE_RESTART_COOLDOWN: Duration = Duration::from_secs(30);

/// How long a peer may sit in `checking` before a restart is attempted.
pub const ICE_CHECKING_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a peer may sit in `disconnected` before a restart is attempted.
pub const ICE_DISCONNECTED_RECOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an incoming track waits for a matching `track-info` message
/// before classification falls back to inference.
pub const TRACK_INFO_WAIT_TIMEOUT: Duration = Duration::from_millis(400);

/// Duration of the buffered-join window after joining a voice session.
pub const BUFFERED_JOIN_WINDOW: Duration = Duration::from_secs(5);

/// Period of the heartbeat + authoritative-reconciliation loop.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Period of the audio-context / output-sink keep-alive loop.
pub const AUDIO_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Period of the RMS analyser sampling loop.
pub const ANALYSER_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Hold-open hysteresis for the voice-activity gate.
pub const VA_HOLD_OPEN: Duration = Duration::from_millis(200);

/// Gain ramp duration applied when a per-user volume changes.
pub const GAIN_RAMP_DURATION: Duration = Duration::from_millis(50);

/// Period of the stats collector loop.
pub const STATS_INTERVAL: Duration = Duration::from_secs(3);

/// Maximum number of unresolved pending remote tracks retained per peer
/// before the oldest is dropped (open question: the source does not bound
/// this map; we cap it to avoid an unbounded leak from a misbehaving peer).
pub const MAX_PENDING_REMOTE_TRACKS_PER_PEER: usize = 16;

/// Base for the signaling transport's exponential reconnect backoff.
pub const RECONNECT_BACKOFF_BASE_SECS: u64 = 2;

/// Ceiling for the signaling transport's reconnect backoff.
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// VA threshold bounds, linearly interpolated by sensitivity (§4.C):
/// `threshold = VA_THRESHOLD_MAX - (VA_THRESHOLD_MAX - VA_THRESHOLD_MIN) * sensitivity`.
pub const VA_THRESHOLD_MIN: f32 = 0.005;
pub const VA_THRESHOLD_MAX: f32 = 0.05;

/// Fixed speaking-indicator threshold (independent of the VA gate).
pub const SPEAKING_RMS_THRESHOLD: f32 = 0.015;

/// Resolve the STUN URL, honoring `MESHTALK_STUN_URL` if set.
pub fn stun_url() -> String {
    std::env::var("MESHTALK_STUN_URL").unwrap_or_else(|_| DEFAULT_STUN_URL.to_string())
}
