//! Offer/answer handling, including glare resolution.
//!
//! Grounded in `webrtc/mod.rs::handle_offer`, generalized from a single
//! server-offer handler into per-peer offer/answer/glare logic, per spec
//! §4.E.

use std::sync::Arc;

use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::track::track_local::TrackLocal;

use crate::media::LocalTrackSource;
use crate::peer::{PeerId, PeerRegistry};
use crate::signaling::candidates;
use crate::signaling::ice_recovery::{parse_offer, IceRecovery};
use crate::signaling::transport::{ClientEvent, SignalingTransport};

/// Deterministic glare tie-break: the user with the lexicographically
/// greater id is "impolite" (ignores the remote offer); the lesser is
/// "polite" (rolls back and accepts).
pub fn is_impolite(local_user_id: &str, remote_user_id: &str) -> bool {
    local_user_id > remote_user_id
}

pub struct OfferAnswerHandler {
    pub registry: Arc<PeerRegistry>,
    pub transport: Arc<dyn SignalingTransport>,
    pub local_tracks: Arc<dyn LocalTrackSource>,
    pub local_user_id: String,
    pub ice_recovery: Arc<IceRecovery>,
}

impl OfferAnswerHandler {
    /// Handle a remote offer for `peer_id`. Creates a new peer if none
    /// exists, resolves glare if one does and a local offer is pending,
    /// otherwise treats it as a renegotiation.
    pub async fn handle_offer(&self, peer_id: &PeerId, sdp: &str) {
        let existing = self.registry.get(peer_id).await;

        let is_closed = existing
            .as_ref()
            .map(|p| p.pc.connection_state() == webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState::Closed)
            .unwrap_or(true);

        if existing.is_none() || is_closed {
            self.accept_offer_on_new_peer(peer_id, sdp).await;
            return;
        }

        let peer = existing.unwrap();

        if peer.pc.signaling_state() == RTCSignalingState::HaveLocalOffer {
            if is_impolite(&self.local_user_id, peer_id) {
                tracing::debug!(peer = %peer_id, "impolite: ignoring remote offer (glare)");
                return;
            }
            tracing::debug!(peer = %peer_id, "polite: rolling back local offer (glare)");
            let rollback = RTCSessionDescription {
                sdp_type: webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Rollback,
                sdp: String::new(),
            };
            if let Err(e) = peer.pc.set_local_description(rollback).await {
                tracing::warn!(peer = %peer_id, error = %e, "rollback failed");
            }
        }

        self.renegotiate_with_offer(peer_id, sdp).await;
    }

    async fn accept_offer_on_new_peer(&self, peer_id: &PeerId, sdp: &str) {
        let mic = self.local_tracks.microphone_track().await;
        let Ok(peer) = self.registry.create_peer(peer_id.clone(), mic).await else {
            tracing::error!(peer = %peer_id, "failed to create peer for inbound offer");
            return;
        };

        if let Some(cam) = self.local_tracks.camera_track().await {
            let _ = self
                .transport
                .send(ClientEvent::SendSignal {
                    target_user_id: peer_id.clone(),
                    payload: serde_json::json!({
                        "type": "track-info",
                        "trackType": "camera",
                        "trackId": cam.id(),
                    }),
                })
                .await;
            if let Ok(sender) = peer
                .pc
                .add_track(cam.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
            {
                *peer.camera_sender.write().await = Some(sender);
                *peer.camera_track.write().await = Some(cam);
            }
        }

        let transport = self.transport.clone();
        let pid = peer_id.clone();
        let sdp = sdp.to_string();
        peer.queue
            .enqueue(peer_id, || async move {
                let offer = parse_offer(&sdp)?;
                peer.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| e.to_string())?;
                candidates::drain(&peer).await;

                let answer = peer
                    .pc
                    .create_answer(None)
                    .await
                    .map_err(|e| e.to_string())?;
                peer.pc
                    .set_local_description(answer.clone())
                    .await
                    .map_err(|e| e.to_string())?;

                transport
                    .send(ClientEvent::SendSignal {
                        target_user_id: pid,
                        payload: serde_json::json!({"type": "answer", "sdp": answer.sdp}),
                    })
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
    }

    async fn renegotiate_with_offer(&self, peer_id: &PeerId, sdp: &str) {
        let Some(peer) = self.registry.get(peer_id).await else {
            return;
        };
        candidates::clear(&peer).await;

        let transport = self.transport.clone();
        let pid = peer_id.clone();
        let sdp_owned = sdp.to_string();
        let result = peer
            .queue
            .enqueue_returning(|| async {
                let offer = parse_offer(&sdp_owned)?;
                peer.pc
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| e.to_string())?;
                candidates::drain(&peer).await;

                let answer = peer
                    .pc
                    .create_answer(None)
                    .await
                    .map_err(|e| e.to_string())?;
                peer.pc
                    .set_local_description(answer.clone())
                    .await
                    .map_err(|e| e.to_string())?;

                transport
                    .send(ClientEvent::SendSignal {
                        target_user_id: pid,
                        payload: serde_json::json!({"type": "answer", "sdp": answer.sdp}),
                    })
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(peer = %peer_id, error = %e, "renegotiation failed, recreating peer");
            self.ice_recovery.nuclear_recreate(peer_id).await;
            self.accept_offer_on_new_peer(peer_id, sdp).await;
        }
    }

    /// Handle a remote answer. Ignored if the peer is not awaiting one
    /// (stale), per spec §4.E.
    pub async fn handle_answer(&self, peer_id: &PeerId, sdp: &str) {
        let Some(peer) = self.registry.get(peer_id).await else {
            return;
        };

        if peer.pc.signaling_state() != RTCSignalingState::HaveLocalOffer {
            tracing::debug!(peer = %peer_id, "ignoring stale answer");
            return;
        }

        let sdp_owned = sdp.to_string();
        peer.queue
            .enqueue(peer_id, || async move {
                let answer = crate::signaling::ice_recovery::parse_answer(&sdp_owned)?;
                peer.pc
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| e.to_string())?;
                candidates::drain(&peer).await;
                Ok::<(), String>(())
            })
            .await;

        peer.mark_progress().await;
    }

    /// Create a peer and send the initial offer, used when joining a
    /// channel with existing participants or when a new user joins.
    pub async fn create_and_offer(&self, peer_id: &PeerId) {
        let mic = self.local_tracks.microphone_track().await;
        let Ok(peer) = self.registry.create_peer(peer_id.clone(), mic).await else {
            tracing::error!(peer = %peer_id, "failed to create peer");
            return;
        };

        if let Some(cam) = self.local_tracks.camera_track().await {
            let _ = self
                .transport
                .send(ClientEvent::SendSignal {
                    target_user_id: peer_id.clone(),
                    payload: serde_json::json!({
                        "type": "track-info",
                        "trackType": "camera",
                        "trackId": cam.id(),
                    }),
                })
                .await;
            if let Ok(sender) = peer
                .pc
                .add_track(cam.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
            {
                *peer.camera_sender.write().await = Some(sender);
                *peer.camera_track.write().await = Some(cam);
            }
        }

        let transport = self.transport.clone();
        let pid = peer_id.clone();
        peer.queue
            .enqueue(peer_id, || async move {
                let offer = peer.pc.create_offer(None).await.map_err(|e| e.to_string())?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greater_id_is_impolite() {
        assert!(is_impolite("zzz", "aaa"));
        assert!(!is_impolite("aaa", "zzz"));
    }
}
