//! Crate-wide error composition.
//!
//! Each component keeps its own `thiserror` enum (matching the teacher's
//! `WebRtcError` / `AudioError` / `CaptureError` / `VideoError` convention).
//! `VoiceError` only composes the ones that cross a user-initiated
//! boundary (join, leave, device changes, start camera/screen-share); it is
//! converted to `String` at the Tauri command boundary, never earlier.

use thiserror::Error;

use crate::audio::{AudioError, MixerError};
use crate::capture::CaptureError;
use crate::device::DeviceError;
use crate::media::{CameraError, MicrophoneError, ScreenCaptureError};
use crate::peer::PeerError;
use crate::signaling::SignalingError;
use crate::video::VideoError;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Microphone(#[from] MicrophoneError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    ScreenCapture(#[from] ScreenCaptureError),

    #[error("not in a voice session")]
    NotInSession,

    #[error("already in a voice session")]
    AlreadyInSession,

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("signaling transport error: {0}")]
    Transport(String),
}
