//! Peer Connection Registry (Component D)
//!
//! Generalizes the teacher's single `WebRtcClient` (one `RTCPeerConnection`
//! for the whole session) into a map of one connection per remote peer —
//! the shape a mesh topology needs. The codec registration, API
//! construction, and callback-wiring pattern are kept from
//! `webrtc/mod.rs::WebRtcClient::new`/`setup_event_handlers`; they are
//! simply parameterized by peer id instead of being singleton state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::connection::{PeerConnection, PeerError, PeerId};

pub const AUDIO_MIME: &str = "audio/opus";
pub const AUDIO_CLOCK_RATE: u32 = 48000;
pub const AUDIO_CHANNELS: u16 = 2;
pub const AUDIO_FMTP: &str = "minptime=10;useinbandfec=1";

/// Handlers invoked by every peer's WebRTC callbacks. Installed once at
/// registry construction and shared across all peers, mirroring the
/// teacher's single boxed-`Fn` callback slots but keyed by peer id.
pub struct PeerHandlers {
    pub on_ice_candidate: Box<dyn Fn(PeerId, String) + Send + Sync>,
    pub on_ice_state_change: Box<dyn Fn(PeerId, RTCIceConnectionState) + Send + Sync>,
    pub on_connection_state_change: Box<dyn Fn(PeerId, RTCPeerConnectionState) + Send + Sync>,
    pub on_track: Box<dyn Fn(PeerId, Arc<TrackRemote>) + Send + Sync>,
}

pub struct PeerRegistry {
    api: Arc<API>,
    peers: RwLock<HashMap<PeerId, Arc<PeerConnection>>>,
    ice_servers: RwLock<Vec<RTCIceServer>>,
    handlers: Arc<PeerHandlers>,
}

impl PeerRegistry {
    pub fn new(handlers: PeerHandlers) -> Result<Self, PeerError> {
        let api = Arc::new(build_api()?);
        Ok(Self {
            api,
            peers: RwLock::new(HashMap::new()),
            ice_servers: RwLock::new(vec![RTCIceServer {
                urls: vec![crate::consts::stun_url()],
                ..Default::default()
            }]),
            handlers: Arc::new(handlers),
        })
    }

    pub async fn set_ice_servers(&self, servers: Vec<RTCIceServer>) {
        *self.ice_servers.write().await = servers;
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerConnection>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Create (replacing any prior connection of the same id) a peer,
    /// installing the ICE-candidate/state-change/track handlers and
    /// adding the local microphone track if provided.
    pub async fn create_peer(
        &self,
        peer_id: PeerId,
        local_audio_track: Option<Arc<TrackLocalStaticRTP>>,
    ) -> Result<Arc<PeerConnection>, PeerError> {
        if let Some(existing) = self.peers.write().await.remove(&peer_id) {
            existing.close().await;
        }

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.read().await.clone(),
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| PeerError::WebRtc(e.to_string()))?;
        let pc = Arc::new(pc);

        let record = Arc::new(PeerConnection::new(peer_id.clone(), pc.clone()));
        self.install_handlers(peer_id.clone(), &pc);

        if let Some(track) = local_audio_track {
            let sender = pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| PeerError::Track(e.to_string()))?;
            *record.audio_sender.write().await = Some(sender);
        }

        self.peers
            .write()
            .await
            .insert(peer_id.clone(), record.clone());

        info!(peer = %peer_id, "peer connection created");
        Ok(record)
    }

    pub async fn close_peer(&self, peer_id: &str) {
        if let Some(peer) = self.peers.write().await.remove(peer_id) {
            peer.close().await;
            info!(peer, "peer connection closed");
        }
    }

    pub async fn close_all(&self) {
        let mut peers = self.peers.write().await;
        for (_, peer) in peers.drain() {
            peer.close().await;
        }
    }

    fn install_handlers(&self, peer_id: PeerId, pc: &Arc<RTCPeerConnection>) {
        let handlers = self.handlers.clone();

        let id = peer_id.clone();
        let h = handlers.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let id = id.clone();
            let h = h.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    if let Ok(json) = candidate.to_json() {
                        if let Ok(s) = serde_json::to_string(&json) {
                            (h.on_ice_candidate)(id, s);
                        }
                    }
                }
            })
        }));

        let id = peer_id.clone();
        let h = handlers.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let id = id.clone();
            let h = h.clone();
            Box::pin(async move {
                (h.on_ice_state_change)(id, s);
            })
        }));

        let id = peer_id.clone();
        let h = handlers.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let id = id.clone();
            let h = h.clone();
            Box::pin(async move {
                (h.on_connection_state_change)(id, s);
            })
        }));

        let id = peer_id;
        let h = handlers;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let id = id.clone();
                let h = h.clone();
                Box::pin(async move {
                    (h.on_track)(id, track);
                })
            },
        ));
    }

    pub fn api(&self) -> &Arc<API> {
        &self.api
    }
}

/// Build the WebRTC API with Opus/VP9/VP8/H.264 codecs registered, kept
/// verbatim from the teacher's `WebRtcClient::new`.
pub fn build_api() -> Result<API, PeerError> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: AUDIO_MIME.to_string(),
                    clock_rate: AUDIO_CLOCK_RATE,
                    channels: AUDIO_CHANNELS,
                    sdp_fmtp_line: AUDIO_FMTP.to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    let video_rtcp_feedback = vec![
        RTCPFeedback {
            typ: "goog-remb".to_string(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "ccm".to_string(),
            parameter: "fir".to_string(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "nack".to_string(),
            parameter: "pli".to_string(),
        },
    ];

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP9".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "profile-id=0".to_string(),
                    rtcp_feedback: video_rtcp_feedback.clone(),
                },
                payload_type: 98,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: video_rtcp_feedback.clone(),
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: "video/H264".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line:
                        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                            .to_string(),
                    rtcp_feedback: video_rtcp_feedback,
                },
                payload_type: 102,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| PeerError::WebRtc(e.to_string()))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

pub fn new_audio_track() -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: AUDIO_MIME.to_string(),
            clock_rate: AUDIO_CLOCK_RATE,
            channels: AUDIO_CHANNELS,
            sdp_fmtp_line: AUDIO_FMTP.to_string(),
            rtcp_feedback: vec![],
        },
        "audio".to_string(),
        uuid::Uuid::new_v4().to_string(),
    ))
}

pub fn new_video_track(stream_id: &str, track_label: &str) -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: "video/VP9".to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: "profile-id=0".to_string(),
            rtcp_feedback: vec![],
        },
        track_label.to_string(),
        stream_id.to_string(),
    ))
}
