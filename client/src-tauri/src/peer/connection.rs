//! A single mesh peer: one [`RTCPeerConnection`] plus the auxiliary state
//! the signaling engine and fanout components need to drive it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use super::queue::SignalingQueue;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("webrtc error: {0}")]
    WebRtc(String),
    #[error("peer not found: {0}")]
    NotFound(String),
    #[error("sdp error: {0}")]
    Sdp(String),
    #[error("ice error: {0}")]
    Ice(String),
    #[error("track error: {0}")]
    Track(String),
}

pub type PeerId = String;

/// One remote peer in the mesh.
pub struct PeerConnection {
    pub id: PeerId,
    pub pc: std::sync::Arc<RTCPeerConnection>,

    /// Serializes all signaling operations touching this peer.
    pub queue: SignalingQueue,

    /// ICE candidates received before the remote description was set.
    pub pending_candidates: tokio::sync::Mutex<Vec<RTCIceCandidateInit>>,

    pub audio_sender: RwLock<Option<std::sync::Arc<RTCRtpSender>>>,
    pub camera_sender: RwLock<Option<std::sync::Arc<RTCRtpSender>>>,
    pub camera_track: RwLock<Option<std::sync::Arc<TrackLocalStaticRTP>>>,

    /// Screen-share senders keyed by local track id, to support
    /// independent video + screen-audio tracks per viewer.
    pub screen_senders: RwLock<HashMap<String, std::sync::Arc<RTCRtpSender>>>,

    pub last_ice_restart_at: RwLock<Option<Instant>>,
    pub ice_restart_in_flight: AtomicBool,

    /// Handle of the pending stall/recovery timer, if any; cancelled on
    /// any transition to connected/completed or on peer close.
    pub ice_recovery_timer: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl PeerConnection {
    pub fn new(id: PeerId, pc: std::sync::Arc<RTCPeerConnection>) -> Self {
        Self {
            id,
            pc,
            queue: SignalingQueue::new(),
            pending_candidates: tokio::sync::Mutex::new(Vec::new()),
            audio_sender: RwLock::new(None),
            camera_sender: RwLock::new(None),
            camera_track: RwLock::new(None),
            screen_senders: RwLock::new(HashMap::new()),
            last_ice_restart_at: RwLock::new(None),
            ice_restart_in_flight: AtomicBool::new(false),
            ice_recovery_timer: RwLock::new(None),
        }
    }

    pub fn cooldown_elapsed(&self, cooldown: std::time::Duration) -> bool {
        // Safe to use try_read: only the recovery task contends, and a
        // momentary false negative just means one fewer allowed restart
        // this tick, never a spurious one.
        match self.last_ice_restart_at.try_read() {
            Ok(guard) => guard.map_or(true, |t| t.elapsed() >= cooldown),
            Err(_) => false,
        }
    }

    pub async fn mark_restart_attempted(&self) {
        *self.last_ice_restart_at.write().await = Some(Instant::now());
    }

    /// Any progress (answer/offer received) resets the cooldown baseline
    /// the same way an attempted restart does.
    pub async fn mark_progress(&self) {
        *self.last_ice_restart_at.write().await = Some(Instant::now());
    }

    pub async fn cancel_recovery_timer(&self) {
        if let Some(handle) = self.ice_recovery_timer.write().await.take() {
            handle.abort();
        }
    }

    pub async fn close(&self) {
        self.cancel_recovery_timer().await;
        if let Err(e) = self.pc.close().await {
            tracing::warn!(peer = %self.id, error = %e, "error closing peer connection");
        }
    }
}
