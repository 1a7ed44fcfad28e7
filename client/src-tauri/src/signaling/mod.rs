//! Signaling Protocol Engine (Component E).
//!
//! Ties together the per-peer serialized queue ([`crate::peer::queue`]),
//! ICE recovery state machine ([`ice_recovery`]), offer/answer + glare
//! handling ([`offer_answer`]), and candidate buffering ([`candidates`])
//! into the single entry point the session controller drives:
//! [`SignalingEngine::handle_signal`].

pub mod candidates;
pub mod ice_recovery;
pub mod offer_answer;
pub mod transport;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

pub use ice_recovery::IceRecovery;
pub use offer_answer::OfferAnswerHandler;
pub use transport::{ClientEvent, ConnectionStatus, SignalingError, SignalingEvent, SignalingTransport};

use crate::media::LocalTrackSource;
use crate::peer::{PeerId, PeerRegistry};
use crate::session::state::ConnectionState;
use crate::track_demux::{ClassifiedTrack, TrackDemultiplexer, TrackType};

/// The typed half of the signal payloads exchanged over
/// `SendSignal`/`ReceiveSignal`, matching spec §6. Ice candidates are sent
/// as a bare `RTCIceCandidateInit` object with no `type` field, so they
/// cannot share this internally-tagged representation (serde does not
/// support mixing an untagged variant into a `tag = "type"` enum); they are
/// tried as a fallback in [`SignalPayload`]'s own `Deserialize` impl below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum TypedSignal {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    TrackInfo {
        #[serde(rename = "trackType")]
        track_type: TrackType,
        #[serde(rename = "trackId")]
        track_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    TrackInfo { track_type: TrackType, track_id: String },
    IceCandidate(RTCIceCandidateInit),
}

impl<'de> Deserialize<'de> for SignalPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        if let Ok(typed) = serde_json::from_value::<TypedSignal>(value.clone()) {
            return Ok(match typed {
                TypedSignal::Offer { sdp } => Self::Offer { sdp },
                TypedSignal::Answer { sdp } => Self::Answer { sdp },
                TypedSignal::TrackInfo { track_type, track_id } => Self::TrackInfo { track_type, track_id },
            });
        }
        serde_json::from_value::<RTCIceCandidateInit>(value)
            .map(Self::IceCandidate)
            .map_err(serde::de::Error::custom)
    }
}

pub struct SignalingEngine {
    pub registry: Arc<PeerRegistry>,
    pub transport: Arc<dyn SignalingTransport>,
    pub offer_answer: Arc<OfferAnswerHandler>,
    pub ice_recovery: Arc<IceRecovery>,
    pub track_demux: Arc<TrackDemultiplexer>,
    on_track_resolved: Box<dyn Fn(ClassifiedTrack) + Send + Sync>,
}

impl SignalingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn SignalingTransport>,
        local_tracks: Arc<dyn LocalTrackSource>,
        local_user_id: String,
        on_connection_state: Box<dyn Fn(ConnectionState) + Send + Sync>,
        on_user_notice: Box<dyn Fn(String, String) + Send + Sync>,
        on_track_resolved: Box<dyn Fn(ClassifiedTrack) + Send + Sync>,
    ) -> Self {
        let ice_recovery = Arc::new(IceRecovery::new(
            registry.clone(),
            transport.clone(),
            local_tracks.clone(),
            on_connection_state,
            on_user_notice,
        ));

        let offer_answer = Arc::new(OfferAnswerHandler {
            registry: registry.clone(),
            transport: transport.clone(),
            local_tracks,
            local_user_id,
            ice_recovery: ice_recovery.clone(),
        });

        Self {
            registry,
            transport,
            offer_answer,
            ice_recovery,
            track_demux: Arc::new(TrackDemultiplexer::new()),
            on_track_resolved,
        }
    }

    /// Dispatch an inbound `ReceiveSignal(from_user_id, payload)` event.
    pub async fn handle_signal(&self, from_user_id: &PeerId, payload: serde_json::Value) {
        let parsed: Result<SignalPayload, _> = serde_json::from_value(payload);
        match parsed {
            Ok(SignalPayload::Offer { sdp }) => {
                self.offer_answer.handle_offer(from_user_id, &sdp).await;
            }
            Ok(SignalPayload::Answer { sdp }) => {
                self.offer_answer.handle_answer(from_user_id, &sdp).await;
            }
            Ok(SignalPayload::TrackInfo { track_type, track_id }) => {
                if let Some(resolved) = self
                    .track_demux
                    .on_track_info(from_user_id, Some(track_id), track_type)
                    .await
                {
                    tracing::debug!(peer = %from_user_id, track_type = ?resolved.track_type, "track resolved by late track-info");
                    (self.on_track_resolved)(resolved);
                }
            }
            Ok(SignalPayload::IceCandidate(candidate)) => {
                if let Some(peer) = self.registry.get(from_user_id).await {
                    candidates::add_or_buffer(&peer, candidate).await;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %from_user_id, error = %e, "unrecognized signal payload");
            }
        }
    }

    pub async fn create_and_offer(&self, peer_id: &PeerId) {
        self.offer_answer.create_and_offer(peer_id).await;
    }

    pub async fn close_peer(&self, peer_id: &str) {
        self.registry.close_peer(peer_id).await;
        self.track_demux.close_peer(peer_id).await;
    }

    pub async fn close_all(&self) {
        for peer_id in self.registry.peer_ids().await {
            self.close_peer(&peer_id).await;
        }
    }
}
