//! Audio keep-alive loop (§4.C).
//!
//! The browser original resumes a suspended `AudioContext` and replays
//! paused remote sinks every 5 s, because runtimes throttle background
//! tabs. `cpal` streams on desktop are not throttled the same way, but the
//! OS can still pause a stream when a device is unplugged/replugged or the
//! process loses audio focus; this loop periodically asks the audio handle
//! to resume itself, which is a no-op when everything is already healthy.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::consts::AUDIO_KEEPALIVE_INTERVAL;

use super::handle::AudioHandle;

/// Spawn the keep-alive loop. Stops when `shutdown_rx` reports `true`.
pub fn spawn(audio: Arc<tokio::sync::Mutex<AudioHandle>>, mut shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(AUDIO_KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("audio keep-alive tick");
                    audio.lock().await.resume_if_suspended().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("audio keep-alive loop stopped");
    })
}
