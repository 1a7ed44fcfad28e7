//! Remote audio mixing & playback (§4.C).
//!
//! The teacher's `audio/handle.rs::run_playback_task` owns exactly one
//! decoder and one output stream, because the teacher only ever has one
//! remote peer. A mesh has many simultaneous speakers, so this module
//! generalizes that single-decoder pattern into one decode task per peer,
//! each pushing gain-adjusted samples into a shared ring buffer that a
//! single output stream sums every callback. The cpal `Stream` itself is
//! still owned by a dedicated blocking task, exactly as the teacher does it
//! (`cpal::Stream` is not `Send`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Host, SampleRate, StreamConfig};
use opus::{Channels as OpusChannels, Decoder};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use super::analyser::Analyser;
use super::gain::GainNode;
use super::{AudioError, CHANNELS, SAMPLE_RATE};
use crate::peer::PeerId;

#[derive(Error, Debug)]
pub enum MixerError {
    #[error(transparent)]
    Audio(#[from] AudioError),
}

type SharedQueue = Arc<StdMutex<VecDeque<f32>>>;

enum StreamControl {
    Stop,
}

struct PeerSink {
    decode_handle: tokio::task::JoinHandle<()>,
    gain: Arc<GainNode>,
    analyser: Arc<Analyser>,
}

/// Owns the single shared output stream and every peer's decode pipeline.
pub struct RemoteAudioMixer {
    host: Arc<Host>,
    queues: Arc<StdMutex<HashMap<PeerId, SharedQueue>>>,
    sinks: AsyncMutex<HashMap<PeerId, PeerSink>>,
    stream_control: AsyncMutex<Option<mpsc::Sender<StreamControl>>>,
}

impl RemoteAudioMixer {
    pub fn new() -> Self {
        Self {
            host: Arc::new(cpal::default_host()),
            queues: Arc::new(StdMutex::new(HashMap::new())),
            sinks: AsyncMutex::new(HashMap::new()),
            stream_control: AsyncMutex::new(None),
        }
    }

    /// (Re)start the shared output stream on the named device, or the
    /// system default if `None`/not found.
    pub async fn start(&self, device_name: Option<&str>) -> Result<(), MixerError> {
        self.stop().await;

        let device = {
            let mut devices = self
                .host
                .output_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?;
            match device_name {
                Some(name) => devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .or_else(|| self.host.default_output_device())
                    .ok_or(AudioError::NoOutputDevice)?,
                None => self.host.default_output_device().ok_or(AudioError::NoOutputDevice)?,
            }
        };

        let (control_tx, mut control_rx) = mpsc::channel::<StreamControl>(1);
        *self.stream_control.lock().await = Some(control_tx);

        let queues = self.queues.clone();
        tokio::task::spawn_blocking(move || {
            let config = StreamConfig {
                channels: CHANNELS,
                sample_rate: SampleRate(SAMPLE_RATE),
                buffer_size: BufferSize::Default,
            };

            let stream = match device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let mut mix = vec![0.0f32; data.len()];
                    if let Ok(mut q) = queues.lock() {
                        for queue in q.values_mut() {
                            for sample in mix.iter_mut() {
                                *sample += queue.pop_front().unwrap_or(0.0);
                            }
                        }
                    }
                    for (dst, src) in data.iter_mut().zip(mix.iter()) {
                        *dst = src.clamp(-1.0, 1.0);
                    }
                },
                |err| error!("remote audio output stream error: {}", err),
                None,
            ) {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to build remote audio output stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                error!("failed to start remote audio output stream: {}", e);
                return;
            }

            while let Some(StreamControl::Stop) = control_rx.blocking_recv() {
                break;
            }
            drop(stream);
            info!("remote audio output stream stopped");
        });

        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.stream_control.lock().await.take() {
            let _ = tx.send(StreamControl::Stop).await;
        }
        let mut sinks = self.sinks.lock().await;
        for (_, sink) in sinks.drain() {
            sink.decode_handle.abort();
        }
        self.queues.lock().unwrap().clear();
    }

    /// Add a peer's decode pipeline: returns the gain node (for per-user
    /// volume), the analyser (for the speaking indicator), and a sender the
    /// caller feeds with decoded-from-RTP Opus frames.
    pub async fn add_peer(&self, peer_id: PeerId) -> Result<(Arc<GainNode>, Arc<Analyser>, mpsc::Sender<Vec<u8>>), MixerError> {
        self.remove_peer(&peer_id).await;

        let queue: SharedQueue = Arc::new(StdMutex::new(VecDeque::new()));
        self.queues.lock().unwrap().insert(peer_id.clone(), queue.clone());

        let gain = Arc::new(GainNode::new(1.0));
        let analyser = Arc::new(Analyser::new());

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(100);
        let gain_clone = gain.clone();
        let analyser_clone = analyser.clone();
        let pid = peer_id.clone();
        let decode_handle = tokio::spawn(async move {
            let mut decoder = match Decoder::new(SAMPLE_RATE, OpusChannels::Stereo) {
                Ok(d) => d,
                Err(e) => {
                    error!(peer = %pid, error = %e, "failed to create remote opus decoder");
                    return;
                }
            };
            let mut pcm = vec![0i16; 4096];
            while let Some(encoded) = rx.recv().await {
                match decoder.decode(&encoded, &mut pcm, false) {
                    Ok(len) => {
                        let mut samples: Vec<f32> =
                            pcm[..len * CHANNELS as usize].iter().map(|&s| f32::from(s) / 32768.0).collect();
                        analyser_clone.tick(&samples);
                        gain_clone.process(&mut samples);
                        if let Ok(mut q) = queue.lock() {
                            q.extend(samples);
                        }
                    }
                    Err(e) => warn!(peer = %pid, error = %e, "remote opus decode error"),
                }
            }
        });

        self.sinks.lock().await.insert(
            peer_id,
            PeerSink { decode_handle, gain: gain.clone(), analyser: analyser.clone() },
        );

        Ok((gain, analyser, tx))
    }

    pub async fn remove_peer(&self, peer_id: &str) {
        if let Some(sink) = self.sinks.lock().await.remove(peer_id) {
            sink.decode_handle.abort();
        }
        self.queues.lock().unwrap().remove(peer_id);
    }

    pub async fn gain_for(&self, peer_id: &str) -> Option<Arc<GainNode>> {
        self.sinks.lock().await.get(peer_id).map(|s| s.gain.clone())
    }

    pub async fn is_speaking(&self, peer_id: &str) -> bool {
        match self.sinks.lock().await.get(peer_id) {
            Some(s) => s.analyser.is_speaking(),
            None => false,
        }
    }
}

impl Default for RemoteAudioMixer {
    fn default() -> Self {
        Self::new()
    }
}
