//! Camera acquisition, publication, and mid-session fanout (§4.B/§4.H).
//!
//! Grounded in `commands/webcam.rs`'s capture -> encode -> RTP pipeline,
//! generalized so the resulting track is published to every mesh peer
//! (instead of one singleton WebRTC connection) with the track-info
//! side-channel message required by the demultiplexer (§4.F) sent before
//! `addTrack`, and renegotiation run through each peer's own queue.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::capture::webcam::{enumerate_webcam_devices, WebcamCapturer};
use crate::capture::I420Frame;
use crate::peer::{new_video_track, PeerRegistry};
use crate::signaling::transport::{ClientEvent, SignalingTransport};
use crate::video::encoder::{VideoEncoder, Vp9Encoder};
use crate::video::rtp::VideoRtpSender;
use crate::video::{EncodedPacket, QualityParams, VideoError};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error("{0}")]
    Capture(String),
    #[error("camera already active")]
    AlreadyActive,
    #[error("camera not active")]
    NotActive,
}

struct CameraSession {
    track: Arc<TrackLocalStaticRTP>,
    shutdown_tx: watch::Sender<bool>,
    capturer_handle: tokio::task::JoinHandle<()>,
    encoder_handle: tokio::task::JoinHandle<()>,
    rtp_handle: tokio::task::JoinHandle<()>,
}

pub struct CameraHandle {
    session: RwLock<Option<CameraSession>>,
    starting: Mutex<()>,
}

impl CameraHandle {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            starting: Mutex::new(()),
        }
    }

    pub async fn track(&self) -> Option<Arc<TrackLocalStaticRTP>> {
        self.session.read().await.as_ref().map(|s| s.track.clone())
    }

    pub async fn is_active(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Acquire the camera and begin the capture -> encode -> RTP pipeline,
    /// without publishing anywhere. Callers add the resulting track to
    /// peer connections themselves (new peers pick it up automatically via
    /// [`super::LocalTrackSource::camera_track`]; existing peers need
    /// [`Self::publish_to_existing_peers`]).
    pub async fn start(
        &self,
        device_index: Option<u32>,
        quality: &str,
    ) -> Result<Arc<TrackLocalStaticRTP>, CameraError> {
        let _guard = self.starting.lock().await;
        if self.session.read().await.is_some() {
            return Err(CameraError::AlreadyActive);
        }

        let params = QualityParams::from_webcam_tier(quality)
            .map_err(CameraError::Capture)?;
        let device_index = device_index.unwrap_or(0);

        let device_name = enumerate_webcam_devices()
            .ok()
            .and_then(|devices| devices.into_iter().find(|d| d.index == device_index).map(|d| d.name))
            .unwrap_or_else(|| format!("Camera {device_index}"));

        let local_track = new_video_track("video", "camera");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_rx2 = shutdown_tx.subscribe();
        let (frame_tx, mut frame_rx) = mpsc::channel::<I420Frame>(2);

        let capturer = WebcamCapturer::new(device_index, params.fps, params.width, params.height);
        let capturer_handle = capturer
            .start(frame_tx, shutdown_rx)
            .map_err(CameraError::Capture)?;

        let (pkt_tx, mut pkt_rx) = mpsc::channel::<Vec<EncodedPacket>>(4);
        let encoder_handle = tokio::task::spawn_blocking(move || {
            let mut encoder = match Vp9Encoder::new(&params) {
                Ok(e) => e,
                Err(e) => {
                    error!(error = %e, "failed to create camera encoder");
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
                        Err(e) => warn!(error = %e, "camera encode error"),
                    },
                    Err(mpsc::error::TryRecvError::Empty) => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                }
            }
        });

        let rtp_track = local_track.clone();
        let rtp_handle = tokio::spawn(async move {
            let sender = VideoRtpSender::new(rtp_track);
            while let Some(packets) = pkt_rx.recv().await {
                for pkt in &packets {
                    if let Err(e) = sender.send_packet(pkt).await {
                        warn!(error = %e, "camera rtp send error");
                    }
                }
            }
        });

        *self.session.write().await = Some(CameraSession {
            track: local_track.clone(),
            shutdown_tx,
            capturer_handle,
            encoder_handle,
            rtp_handle,
        });

        info!(device = %device_name, "camera started");
        Ok(local_track)
    }

    pub async fn stop(&self) -> Result<(), CameraError> {
        let session = self.session.write().await.take().ok_or(CameraError::NotActive)?;
        let _ = session.shutdown_tx.send(true);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(3), async {
            let _ = session.capturer_handle.await;
            let _ = session.encoder_handle.await;
            let _ = session.rtp_handle.await;
        })
        .await;
        info!("camera stopped");
        Ok(())
    }

    /// Publish the already-acquired camera track to every existing peer:
    /// track-info, then `addTrack`, then renegotiate under that peer's
    /// queue. Used when the camera is started mid-session (§4.H).
    pub async fn publish_to_existing_peers(
        &self,
        registry: &PeerRegistry,
        transport: &Arc<dyn SignalingTransport>,
    ) {
        let Some(track) = self.track().await else {
            return;
        };

        for peer in registry.all().await {
            let _ = transport
                .send(ClientEvent::SendSignal {
                    target_user_id: peer.id.clone(),
                    payload: serde_json::json!({
                        "type": "track-info",
                        "trackType": "camera",
                        "trackId": track.id(),
                    }),
                })
                .await;

            let transport = transport.clone();
            let pid = peer.id.clone();
            let track = track.clone();
            let peer_for_sender = peer.clone();
            peer.queue
                .enqueue(&pid, || async move {
                    let pc = peer_for_sender.pc.clone();
                    let sender = pc
                        .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                        .await
                        .map_err(|e| e.to_string())?;
                    *peer_for_sender.camera_sender.write().await = Some(sender);
                    *peer_for_sender.camera_track.write().await = Some(track);

                    let offer = pc.create_offer(None).await.map_err(|e| e.to_string())?;
                    pc.set_local_description(offer.clone())
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

    /// Remove the camera sender from every peer and renegotiate, used on
    /// `stop_camera` while peers are connected.
    pub async fn unpublish_from_existing_peers(
        &self,
        registry: &PeerRegistry,
        transport: &Arc<dyn SignalingTransport>,
    ) {
        for peer in registry.all().await {
            if peer.camera_sender.read().await.is_none() {
                continue;
            }

            let transport = transport.clone();
            let pid = peer.id.clone();
            let peer_for_sender = peer.clone();
            peer.queue
                .enqueue(&pid, || async move {
                    let pc = peer_for_sender.pc.clone();
                    let sender = peer_for_sender.camera_sender.write().await.take();
                    let Some(sender) = sender else { return Ok(()) };
                    pc.remove_track(&sender).await.map_err(|e| e.to_string())?;
                    *peer_for_sender.camera_track.write().await = None;

                    let offer = pc.create_offer(None).await.map_err(|e| e.to_string())?;
                    pc.set_local_description(offer.clone())
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
}

impl Default for CameraHandle {
    fn default() -> Self {
        Self::new()
    }
}
