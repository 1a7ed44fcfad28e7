//! Opus RTP sender.
//!
//! Mirrors `video::rtp::VideoRtpSender`: each encoded Opus frame fits in a
//! single RTP packet (20 ms frames never exceed the MTU), so no
//! fragmentation is needed. `TrackLocalStaticRTP::write()` owns the RTP
//! header (SSRC, sequence, payload type); we only hand it the payload.

use std::sync::Arc;

use tracing::trace;
use webrtc::track::track_local::{track_local_static_rtp::TrackLocalStaticRTP, TrackLocalWriter};

use super::AudioError;

pub struct AudioRtpSender {
    track: Arc<TrackLocalStaticRTP>,
}

impl AudioRtpSender {
    pub fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        Self { track }
    }

    /// Send one Opus-encoded 20 ms frame.
    pub async fn send_frame(&self, encoded: &[u8]) -> Result<(), AudioError> {
        if encoded.is_empty() {
            return Ok(());
        }
        self.track
            .write(encoded)
            .await
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        trace!(len = encoded.len(), "sent opus rtp frame");
        Ok(())
    }
}
