//! Microphone acquisition and publication (§4.B).
//!
//! Wraps [`crate::audio::AudioHandle`] (capture/playback/mic-test, kept
//! verbatim from the teacher) with the local outbound Opus track and the
//! RTP sender that feeds every peer connection's audio sender. Replacing
//! the microphone never renegotiates: `RTCRtpSender::replace_track` swaps
//! the media on an existing sender without an SDP exchange, exactly as
//! spec'd.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::audio::rtp::AudioRtpSender;
use crate::audio::{AudioError, AudioHandle};
use crate::peer::{new_audio_track, PeerRegistry};

#[derive(Error, Debug)]
pub enum MicrophoneError {
    #[error(transparent)]
    Audio(#[from] AudioError),
}

pub struct MicrophoneHandle {
    audio: Arc<Mutex<AudioHandle>>,
    track: RwLock<Option<Arc<TrackLocalStaticRTP>>>,
    sender_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MicrophoneHandle {
    pub fn new() -> Result<Self, MicrophoneError> {
        Ok(Self {
            audio: Arc::new(Mutex::new(AudioHandle::new()?)),
            track: RwLock::new(None),
            sender_task: Mutex::new(None),
        })
    }

    pub fn audio(&self) -> &Arc<Mutex<AudioHandle>> {
        &self.audio
    }

    /// The local mic's speaking-indicator analyser, stable across
    /// acquire/release cycles.
    pub async fn analyser(&self) -> Arc<crate::audio::analyser::Analyser> {
        self.audio.lock().await.analyser()
    }

    pub async fn track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.track.read().await.clone()
    }

    /// Acquire the microphone: resolves to the input device already set on
    /// the underlying `AudioHandle`, creates the local Opus track, and
    /// starts the capture -> encode -> RTP pipeline feeding it.
    pub async fn acquire(&self) -> Result<Arc<TrackLocalStaticRTP>, MicrophoneError> {
        self.stop_inner().await;

        let local_track = new_audio_track();
        let (encoded_tx, mut encoded_rx) = mpsc::channel::<Vec<u8>>(100);

        self.audio.lock().await.start_capture(encoded_tx).await?;

        let sender = AudioRtpSender::new(local_track.clone());
        let handle = tokio::spawn(async move {
            while let Some(frame) = encoded_rx.recv().await {
                if let Err(e) = sender.send_frame(&frame).await {
                    warn!(error = %e, "failed to send microphone rtp frame");
                }
            }
        });

        *self.sender_task.lock().await = Some(handle);
        *self.track.write().await = Some(local_track.clone());
        info!("microphone acquired");
        Ok(local_track)
    }

    /// Replace the microphone track on every existing peer connection's
    /// audio sender without renegotiating, per §4.B.
    pub async fn replace(&self, registry: &PeerRegistry) -> Result<(), MicrophoneError> {
        let new_track = self.acquire().await?;

        for peer in registry.all().await {
            let sender = peer.audio_sender.read().await.clone();
            if let Some(sender) = sender {
                if let Err(e) = sender
                    .replace_track(Some(new_track.clone() as Arc<dyn TrackLocal + Send + Sync>))
                    .await
                {
                    warn!(peer = %peer.id, error = %e, "failed to replace microphone track");
                }
            }
        }
        Ok(())
    }

    pub async fn set_muted(&self, muted: bool) {
        self.audio.lock().await.set_muted(muted);
    }

    pub async fn set_deafened(&self, deafened: bool) {
        self.audio.lock().await.set_deafened(deafened);
    }

    async fn stop_inner(&self) {
        if let Some(handle) = self.sender_task.lock().await.take() {
            handle.abort();
        }
        self.audio.lock().await.stop_capture().await;
    }

    pub async fn release(&self) {
        self.stop_inner().await;
        self.audio.lock().await.stop_playback().await;
        *self.track.write().await = None;
        info!("microphone released");
    }
}
