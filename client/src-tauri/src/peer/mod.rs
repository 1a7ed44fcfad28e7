//! Peer Connection Registry (Component D).
//!
//! One [`RTCPeerConnection`](webrtc::peer_connection::RTCPeerConnection)
//! per remote mesh participant, held in [`registry::PeerRegistry`], each
//! with a serialized signaling queue ([`queue::SignalingQueue`]) and the
//! auxiliary state described in [`connection::PeerConnection`].

pub mod connection;
pub mod queue;
pub mod registry;

pub use connection::{PeerConnection, PeerError, PeerId};
pub use registry::{new_audio_track, new_video_track, PeerHandlers, PeerRegistry};
