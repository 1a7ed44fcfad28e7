//! Local Media Manager (Component B).
//!
//! Owns local microphone/camera/screen acquisition. The teacher keeps these
//! as three unrelated, session-scoped pipelines bolted directly onto
//! `VoiceState` (`audio: AudioHandle`, `webcam: Option<WebcamPipeline>`,
//! `screen_share: Option<ScreenSharePipeline>`); here they are grouped
//! behind one [`LocalMedia`] so the signaling engine has a single place to
//! ask "what local tracks exist right now" when building or rebuilding a
//! peer connection.

pub mod camera;
pub mod microphone;
pub mod screen;

use std::sync::Arc;

use async_trait::async_trait;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

pub use camera::{CameraError, CameraHandle};
pub use microphone::{MicrophoneError, MicrophoneHandle};
pub use screen::{ScreenCaptureError, ScreenCaptureHandle};

/// What the signaling engine needs when creating or rebuilding a peer
/// connection: the local tracks that should ride on every mesh link.
/// Screen share is deliberately absent here — per §4.B/§4.H it is never
/// added to a peer eagerly, only to a viewer that explicitly requested it.
#[async_trait]
pub trait LocalTrackSource: Send + Sync {
    async fn microphone_track(&self) -> Option<Arc<TrackLocalStaticRTP>>;
    async fn camera_track(&self) -> Option<Arc<TrackLocalStaticRTP>>;
}

/// Aggregates the three local media sources behind one handle, owned by
/// the voice session controller for the lifetime of a session.
pub struct LocalMedia {
    pub microphone: MicrophoneHandle,
    pub camera: CameraHandle,
    pub screen: ScreenCaptureHandle,
}

impl LocalMedia {
    pub fn new() -> Result<Self, MicrophoneError> {
        Ok(Self {
            microphone: MicrophoneHandle::new()?,
            camera: CameraHandle::new(),
            screen: ScreenCaptureHandle::new(),
        })
    }
}

#[async_trait]
impl LocalTrackSource for LocalMedia {
    async fn microphone_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.microphone.track().await
    }

    async fn camera_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.camera.track().await
    }
}
