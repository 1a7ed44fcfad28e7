//! Screen Share & Camera Fanout (Component H), viewer-facing half.
//!
//! Camera is pushed to every peer eagerly on acquisition
//! ([`crate::media::camera::CameraHandle::publish_to_existing_peers`]).
//! Screen share is the opposite: per §4.B/§4.H a capture is never added to
//! a peer connection until that peer's user explicitly asks to watch, so
//! this module owns the per-viewer publish/unpublish cycle driving a
//! sharer's screen senders. Grounded in the same renegotiate-under-queue
//! pattern as `media/camera.rs`, generalized to a single viewer instead of
//! every peer.

use std::sync::Arc;

use tracing::{debug, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::track::track_local::TrackLocal;

use crate::media::LocalMedia;
use crate::peer::{PeerId, PeerRegistry};
use crate::signaling::transport::{ClientEvent, SignalingTransport};

/// A viewer asked to watch this peer's screen share (`WatchStreamRequested`).
/// Sends `track-info(screen)` then `addTrack` for the active screen video
/// track, records the sender, and renegotiates under the viewer's queue.
/// Screen-share audio is not implemented in this build (no system-audio
/// capture exists in [`crate::media::screen`]), so only video is published.
pub async fn on_watch_stream_requested(
    registry: &PeerRegistry,
    transport: &Arc<dyn SignalingTransport>,
    local_media: &LocalMedia,
    viewer_id: &PeerId,
) {
    let Some(video_track) = local_media.screen.video_track().await else {
        debug!(viewer = %viewer_id, "watch requested but not currently sharing");
        return;
    };
    let Some(peer) = registry.get(viewer_id).await else {
        warn!(viewer = %viewer_id, "watch requested by unknown peer");
        return;
    };

    let track_id = video_track.id();
    let _ = transport
        .send(ClientEvent::SendSignal {
            target_user_id: viewer_id.clone(),
            payload: serde_json::json!({
                "type": "track-info",
                "trackType": "screen",
                "trackId": track_id,
            }),
        })
        .await;

    let transport = transport.clone();
    let vid = viewer_id.clone();
    let peer_for_sender = peer.clone();
    let result = peer
        .queue
        .enqueue_returning(|| async move {
            let pc = peer_for_sender.pc.clone();
            if pc.ice_connection_state() == RTCIceConnectionState::Failed
                || pc.signaling_state() != RTCSignalingState::Stable
            {
                return Err("peer not in a renegotiable state".to_string());
            }

            let sender = pc
                .add_track(video_track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| e.to_string())?;
            peer_for_sender.screen_senders.write().await.insert(track_id.clone(), sender.clone());

            let offer = pc.create_offer(None).await.map_err(|e| e.to_string())?;
            if let Err(e) = pc.set_local_description(offer.clone()).await {
                if let Some(sender) = peer_for_sender.screen_senders.write().await.remove(&track_id) {
                    let _ = pc.remove_track(&sender).await;
                }
                return Err(e.to_string());
            }
            if let Err(e) = transport
                .send(ClientEvent::SendSignal {
                    target_user_id: vid,
                    payload: serde_json::json!({"type": "offer", "sdp": offer.sdp}),
                })
                .await
            {
                if let Some(sender) = peer_for_sender.screen_senders.write().await.remove(&track_id) {
                    let _ = pc.remove_track(&sender).await;
                }
                return Err(e.to_string());
            }
            Ok(())
        })
        .await;

    if let Err(e) = result {
        debug!(viewer = %viewer_id, error = %e, "skipping or rolling back watch request");
    }
}

/// A viewer asked to stop watching (`StopWatchingRequested`). Removes every
/// screen sender we hold for that peer and renegotiates.
pub async fn on_stop_watching_requested(
    registry: &PeerRegistry,
    transport: &Arc<dyn SignalingTransport>,
    viewer_id: &PeerId,
) {
    let Some(peer) = registry.get(viewer_id).await else {
        return;
    };
    remove_all_screen_senders(&peer, transport).await;
}

/// Used by `stop_screen_share`: tears down the sender this sharer is
/// publishing to every viewer currently watching.
pub async fn stop_sharing_with_all_viewers(registry: &PeerRegistry, transport: &Arc<dyn SignalingTransport>) {
    for peer in registry.all().await {
        remove_all_screen_senders(&peer, transport).await;
    }
}

async fn remove_all_screen_senders(peer: &Arc<crate::peer::PeerConnection>, transport: &Arc<dyn SignalingTransport>) {
    if peer.screen_senders.read().await.is_empty() {
        return;
    }

    let transport = transport.clone();
    let pid = peer.id.clone();
    let peer = peer.clone();
    peer.queue
        .enqueue(&pid, || async move {
            let senders: Vec<_> = peer.screen_senders.write().await.drain().map(|(_, s)| s).collect();
            for sender in &senders {
                if let Err(e) = peer.pc.remove_track(sender).await {
                    warn!(peer = %peer.id, error = %e, "failed to remove screen sender");
                }
            }

            if peer.pc.signaling_state() != RTCSignalingState::Stable {
                return Ok(());
            }
            let offer = peer.pc.create_offer(None).await.map_err(|e| e.to_string())?;
            peer.pc.set_local_description(offer.clone()).await.map_err(|e| e.to_string())?;
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
