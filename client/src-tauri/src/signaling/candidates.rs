//! ICE candidate buffering and draining.
//!
//! Grounded in `webrtc/mod.rs::add_ice_candidate`, generalized with a
//! pending buffer: candidates that arrive before the remote description is
//! set must be held and applied afterwards, per spec §4.E.

use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::RTCPeerConnection;

use crate::peer::PeerConnection;

/// Apply a candidate if the remote description is already set, otherwise
/// buffer it for the next drain.
pub async fn add_or_buffer(peer: &PeerConnection, candidate: RTCIceCandidateInit) {
    if peer.pc.remote_description().await.is_some() {
        apply(&peer.pc, candidate).await;
    } else {
        peer.pending_candidates.lock().await.push(candidate);
    }
}

/// Drain and apply all buffered candidates. Call after every
/// `set_remote_description`.
pub async fn drain(peer: &PeerConnection) {
    let pending: Vec<_> = peer.pending_candidates.lock().await.drain(..).collect();
    for candidate in pending {
        apply(&peer.pc, candidate).await;
    }
}

/// Clear buffered candidates referring to a stale SDP generation (e.g.
/// before renegotiating).
pub async fn clear(peer: &PeerConnection) {
    peer.pending_candidates.lock().await.clear();
}

async fn apply(pc: &RTCPeerConnection, candidate: RTCIceCandidateInit) {
    // A stale ufrag after renegotiation is expected and silently ignored,
    // per spec §4.E ("silently ignore errors").
    if let Err(e) = pc.add_ice_candidate(candidate).await {
        tracing::debug!(error = %e, "ignoring ice candidate apply error");
    }
}
