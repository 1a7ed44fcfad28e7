//! Screen/window capture acquisition (§4.B).
//!
//! Grounded in `commands/screen_share.rs`'s capture -> encode -> RTP
//! pipeline. Per §4.B and §9's design note, acquiring a screen capture
//! **never** publishes a track to any peer — it only makes a track
//! available for [`crate::fanout`] to hand to viewers that explicitly
//! request it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::capture::capturer::FrameCapturer;
use crate::capture::source::{enumerate_sources, find_target_by_id};
use crate::capture::{CaptureSource, CaptureSourceType, I420Frame};
use crate::peer::new_video_track;
use crate::video::encoder::{VideoEncoder, Vp9Encoder};
use crate::video::rtp::VideoRtpSender;
use crate::video::{EncodedPacket, QualityParams, VideoError};

#[derive(Error, Debug)]
pub enum ScreenCaptureError {
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error("{0}")]
    Capture(String),
    #[error("already sharing")]
    AlreadyActive,
    #[error("not sharing")]
    NotActive,
    #[error("source not found: {0}")]
    SourceNotFound(String),
}

pub struct ScreenShareInfo {
    pub source_name: String,
    pub source_type: CaptureSourceType,
    pub quality: String,
}

struct ScreenSession {
    video_track: Arc<TrackLocalStaticRTP>,
    info: ScreenShareInfo,
    shutdown_tx: watch::Sender<bool>,
    capturer_handle: tokio::task::JoinHandle<()>,
    encoder_handle: tokio::task::JoinHandle<()>,
    rtp_handle: tokio::task::JoinHandle<()>,
}

pub struct ScreenCaptureHandle {
    session: RwLock<Option<ScreenSession>>,
    starting: Mutex<()>,
}

impl ScreenCaptureHandle {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            starting: Mutex::new(()),
        }
    }

    pub fn enumerate_sources() -> Result<Vec<CaptureSource>, ScreenCaptureError> {
        enumerate_sources().map_err(|e| ScreenCaptureError::Capture(e.to_string()))
    }

    pub async fn is_active(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn video_track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.session.read().await.as_ref().map(|s| s.video_track.clone())
    }

    pub async fn info(&self) -> Option<(String, CaptureSourceType, String)> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| (s.info.source_name.clone(), s.info.source_type.clone(), s.info.quality.clone()))
    }

    /// Acquire a display/window capture stream and begin encoding, but do
    /// not touch any peer connection.
    pub async fn start(&self, source_id: &str, quality: &str) -> Result<(), ScreenCaptureError> {
        let _guard = self.starting.lock().await;
        if self.session.read().await.is_some() {
            return Err(ScreenCaptureError::AlreadyActive);
        }

        let params = QualityParams::from_tier(quality).map_err(ScreenCaptureError::Capture)?;
        let target = find_target_by_id(source_id)
            .ok_or_else(|| ScreenCaptureError::SourceNotFound(source_id.to_string()))?;

        let (source_name, source_type) = match &target {
            scap::Target::Display(d) => (
                if d.title.is_empty() { format!("Display {}", d.id) } else { d.title.clone() },
                CaptureSourceType::Monitor,
            ),
            scap::Target::Window(w) => (
                if w.title.is_empty() { format!("Window {}", w.id) } else { w.title.clone() },
                CaptureSourceType::Window,
            ),
        };

        let video_track = new_video_track("screen", "screen");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_rx2 = shutdown_tx.subscribe();
        let (frame_tx, mut frame_rx) = mpsc::channel::<I420Frame>(2);

        let capturer = FrameCapturer::new(target, source_id.to_string(), params.fps, params.width, params.height);
        let capturer_handle = capturer
            .start(frame_tx, shutdown_rx)
            .map_err(ScreenCaptureError::Capture)?;

        let (pkt_tx, mut pkt_rx) = mpsc::channel::<Vec<EncodedPacket>>(4);
        let encoder_handle = tokio::task::spawn_blocking(move || {
            let mut encoder = match Vp9Encoder::new(&params) {
                Ok(e) => e,
                Err(e) => {
                    error!(error = %e, "failed to create screen share encoder");
                    return;
                }
            };
            let shutdown_rx = shutdown_rx2;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                match frame_rx.try_recv() {
                    Ok(i420) => match encoder.encode(&i420) {
                        Ok(packets) => {
                            if !packets.is_empty() && pkt_tx.blocking_send(packets).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "screen share encode error"),
                    },
                    Err(mpsc::error::TryRecvError::Empty) => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                }
            }
        });

        let rtp_track = video_track.clone();
        let rtp_handle = tokio::spawn(async move {
            let sender = VideoRtpSender::new(rtp_track);
            while let Some(packets) = pkt_rx.recv().await {
                for pkt in &packets {
                    if let Err(e) = sender.send_packet(pkt).await {
                        warn!(error = %e, "screen share rtp send error");
                    }
                }
            }
        });

        *self.session.write().await = Some(ScreenSession {
            video_track,
            info: ScreenShareInfo {
                source_name: source_name.clone(),
                source_type,
                quality: quality.to_string(),
            },
            shutdown_tx,
            capturer_handle,
            encoder_handle,
            rtp_handle,
        });

        info!(source = %source_name, "screen share started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), ScreenCaptureError> {
        let session = self.session.write().await.take().ok_or(ScreenCaptureError::NotActive)?;
        let _ = session.shutdown_tx.send(true);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(3), async {
            let _ = session.capturer_handle.await;
            let _ = session.encoder_handle.await;
            let _ = session.rtp_handle.await;
        })
        .await;
        info!("screen share stopped");
        Ok(())
    }
}

impl Default for ScreenCaptureHandle {
    fn default() -> Self {
        Self::new()
    }
}
