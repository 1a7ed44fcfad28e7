//! Per-peer ICE recovery state machine: stall timers, restart cooldown,
//! and the "nuclear recreate" fallback.
//!
//! Grounded in `webrtc/mod.rs::setup_event_handlers`'s connection-state
//! callback, generalized from a single global state flag into a per-peer
//! timer-driven state machine per spec §4.E.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

use crate::consts::{
    ICE_CHECKING_STALL_TIMEOUT, ICE_DISCONNECTED_RECOVERY_TIMEOUT, ICE_RESTART_COOLDOWN,
};
use crate::media::LocalTrackSource;
use crate::peer::{PeerId, PeerRegistry};
use crate::session::state::ConnectionState;
use crate::signaling::transport::{ClientEvent, SignalingTransport};

pub struct IceRecovery {
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn SignalingTransport>,
    local_tracks: Arc<dyn LocalTrackSource>,
    on_connection_state: Box<dyn Fn(ConnectionState) + Send + Sync>,
    on_user_notice: Box<dyn Fn(String, String) + Send + Sync>,
}

impl IceRecovery {
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn SignalingTransport>,
        local_tracks: Arc<dyn LocalTrackSource>,
        on_connection_state: Box<dyn Fn(ConnectionState) + Send + Sync>,
        on_user_notice: Box<dyn Fn(String, String) + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            transport,
            local_tracks,
            on_connection_state,
            on_user_notice,
        }
    }

    /// Entry point wired to `PeerHandlers::on_ice_state_change`.
    pub async fn on_ice_state_change(self: &Arc<Self>, peer_id: PeerId, state: RTCIceConnectionState) {
        let Some(peer) = self.registry.get(&peer_id).await else {
            return;
        };

        match state {
            RTCIceConnectionState::Checking => {
                self.schedule_timer(peer_id, ICE_CHECKING_STALL_TIMEOUT, state)
                    .await;
            }
            RTCIceConnectionState::Disconnected => {
                (self.on_connection_state)(ConnectionState::Reconnecting);
                self.schedule_timer(peer_id, ICE_DISCONNECTED_RECOVERY_TIMEOUT, state)
                    .await;
            }
            RTCIceConnectionState::Failed => {
                peer.cancel_recovery_timer().await;
                (self.on_user_notice)(
                    peer_id.clone(),
                    "connection lost, attempting to reconnect".to_string(),
                );
                let this = self.clone();
                let id = peer_id.clone();
                tokio::spawn(async move { this.restart(&id).await });
            }
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                peer.cancel_recovery_timer().await;
                self.maybe_mark_connected().await;
            }
            _ => {}
        }
    }

    async fn schedule_timer(self: &Arc<Self>, peer_id: PeerId, timeout: std::time::Duration, expected: RTCIceConnectionState) {
        let Some(peer) = self.registry.get(&peer_id).await else {
            return;
        };
        peer.cancel_recovery_timer().await;

        let this = self.clone();
        let id = peer_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(peer) = this.registry.get(&id).await {
                if peer.pc.ice_connection_state() == expected {
                    this.restart(&id).await;
                }
            }
        });
        *peer.ice_recovery_timer.write().await = Some(handle);
    }

    /// Entry point wired to `PeerHandlers::on_connection_state_change`: a
    /// peer connection settling (or closing) may be the last one the
    /// overall session was waiting on.
    pub async fn recheck_connected(&self) {
        self.maybe_mark_connected().await;
    }

    async fn maybe_mark_connected(&self) {
        let peers = self.registry.all().await;
        let all_settled = peers.iter().all(|p| {
            matches!(
                p.pc.connection_state(),
                RTCPeerConnectionState::Connected
                    | RTCPeerConnectionState::Closed
            )
        });
        if all_settled {
            (self.on_connection_state)(ConnectionState::Connected);
        }
    }

    /// Attempt an ICE restart for `peer_id`, subject to cooldown and
    /// in-flight guards; falls through to a nuclear recreate on failure.
    pub async fn restart(self: &Arc<Self>, peer_id: &str) {
        let Some(peer) = self.registry.get(peer_id).await else {
            return;
        };

        if peer.ice_restart_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        if !peer.cooldown_elapsed(ICE_RESTART_COOLDOWN) {
            tracing::warn!(peer = peer_id, "skipping ice restart (cooldown)");
            peer.ice_restart_in_flight.store(false, Ordering::SeqCst);
            return;
        }

        peer.mark_restart_attempted().await;
        let transport = self.transport.clone();
        let pid = peer_id.to_string();

        let result = peer
            .queue
            .enqueue_returning(|| async {
                if peer.pc.signaling_state() != RTCSignalingState::Stable {
                    return Ok(());
                }
                let offer = peer
                    .pc
                    .create_offer(Some(webrtc::peer_connection::offer_answer_options::RTCOfferOptions {
                        ice_restart: true,
                        voice_activity_detection: false,
                    }))
                    .await
                    .map_err(|e| e.to_string())?;
                peer.pc
                    .set_local_description(offer.clone())
                    .await
                    .map_err(|e| e.to_string())?;
                transport
                    .send(ClientEvent::SendSignal {
                        target_user_id: pid.clone(),
                        payload: serde_json::json!({"type": "offer", "sdp": offer.sdp}),
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                Ok::<(), String>(())
            })
            .await;

        peer.ice_restart_in_flight.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            tracing::warn!(peer = peer_id, error = %e, "ice restart failed, recreating peer");
            self.nuclear_recreate(peer_id).await;
        }
    }

    /// Destroy and rebuild the peer connection from scratch, re-adding
    /// local tracks and sending a fresh offer.
    pub async fn nuclear_recreate(&self, peer_id: &str) {
        let mic = self.local_tracks.microphone_track().await;
        let Ok(peer) = self.registry.create_peer(peer_id.to_string(), mic).await else {
            tracing::error!(peer = peer_id, "nuclear recreate failed to build new peer");
            return;
        };

        let camera = self.local_tracks.camera_track().await;
        let transport = self.transport.clone();
        let pid = peer_id.to_string();
        peer.queue
            .enqueue(peer_id, || async move {
                if let Some(cam) = camera {
                    if let Ok(sender) = peer
                        .pc
                        .add_track(cam.clone() as Arc<dyn webrtc::track::track_local::TrackLocal + Send + Sync>)
                        .await
                    {
                        *peer.camera_sender.write().await = Some(sender);
                        *peer.camera_track.write().await = Some(cam);
                    }
                }

                let offer = peer
                    .pc
                    .create_offer(None)
                    .await
                    .map_err(|e| e.to_string())?;
                peer.pc
                    .set_local_description(offer.clone())
                    .await
                    .map_err(|e| e.to_string())?;
                transport
                    .send(ClientEvent::SendSignal {
                        target_user_id: pid,
                        payload: serde_json::json!({"type": "offer", "sdp": offer.sdp}),
                    })
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
    }
}

/// Helper used by offer/answer handling to parse a remote SDP string.
pub fn parse_offer(sdp: &str) -> Result<RTCSessionDescription, String> {
    RTCSessionDescription::offer(sdp.to_string()).map_err(|e| e.to_string())
}

pub fn parse_answer(sdp: &str) -> Result<RTCSessionDescription, String> {
    RTCSessionDescription::answer(sdp.to_string()).map_err(|e| e.to_string())
}
