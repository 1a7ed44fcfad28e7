//! Stats Collector (Component I).
//!
//! Every [`STATS_INTERVAL`] while a session is active, aggregates RTT
//! (from the succeeded candidate pair), inbound audio packet loss ratio,
//! and inbound audio jitter across every peer, exposing the means. The
//! teacher has no stats surface at all (single peer connection, no
//! telemetry); this is new, built the way the rest of this crate talks to
//! `webrtc::peer_connection::RTCPeerConnection` — a plain polling loop
//! shaped like `audio/keepalive.rs`'s.
//!
//! Note: `RTCPeerConnection::get_stats`'s exact report shape is read
//! best-effort here (no compiler available in this environment to confirm
//! field names against the pinned `webrtc` version) — same caveat as
//! `media/camera.rs`'s use of `remove_track`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use webrtc::ice_transport::ice_candidate_pair::RTCIceCandidatePairState;
use webrtc::stats::StatsReportType;

use crate::consts::STATS_INTERVAL;
use crate::peer::PeerRegistry;

/// Aggregate, mean-of-peers snapshot. All fields are `0.0` when no peer
/// reports a given stat (e.g. no audio yet, or no succeeded candidate pair).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub mean_rtt_ms: f64,
    pub mean_inbound_audio_loss_ratio: f64,
    pub mean_inbound_audio_jitter_ms: f64,
    pub peer_count: usize,
}

struct AtomicSnapshot {
    rtt_ms_bits: AtomicU64,
    loss_ratio_bits: AtomicU64,
    jitter_ms_bits: AtomicU64,
    peer_count: AtomicU64,
}

impl Default for AtomicSnapshot {
    fn default() -> Self {
        Self {
            rtt_ms_bits: AtomicU64::new(0),
            loss_ratio_bits: AtomicU64::new(0),
            jitter_ms_bits: AtomicU64::new(0),
            peer_count: AtomicU64::new(0),
        }
    }
}

pub struct StatsCollector {
    registry: Arc<PeerRegistry>,
    snapshot: Arc<AtomicSnapshot>,
    shutdown_tx: watch::Sender<bool>,
}

impl StatsCollector {
    pub fn start(registry: Arc<PeerRegistry>) -> Self {
        let snapshot = Arc::new(AtomicSnapshot::default());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let registry_clone = registry.clone();
        let snapshot_clone = snapshot.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        poll_once(&registry_clone, &snapshot_clone).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self { registry, snapshot, shutdown_tx }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            mean_rtt_ms: f64::from_bits(self.snapshot.rtt_ms_bits.load(Ordering::Relaxed)),
            mean_inbound_audio_loss_ratio: f64::from_bits(self.snapshot.loss_ratio_bits.load(Ordering::Relaxed)),
            mean_inbound_audio_jitter_ms: f64::from_bits(self.snapshot.jitter_ms_bits.load(Ordering::Relaxed)),
            peer_count: self.snapshot.peer_count.load(Ordering::Relaxed) as usize,
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn poll_once(registry: &Arc<PeerRegistry>, snapshot: &Arc<AtomicSnapshot>) {
    let peers = registry.all().await;
    if peers.is_empty() {
        snapshot.peer_count.store(0, Ordering::Relaxed);
        return;
    }

    let mut rtts = Vec::new();
    let mut loss_ratios = Vec::new();
    let mut jitters = Vec::new();

    for peer in &peers {
        let report = peer.pc.get_stats().await;
        for entry in report.reports.values() {
            match entry {
                StatsReportType::CandidatePair(pair) if pair.state == RTCIceCandidatePairState::Succeeded => {
                    rtts.push(pair.current_round_trip_time * 1000.0);
                }
                StatsReportType::InboundRTP(inbound) if inbound.kind == "audio" => {
                    let received = inbound.packets_received as f64;
                    let lost = inbound.packets_lost as f64;
                    if received + lost > 0.0 {
                        loss_ratios.push(lost / (received + lost));
                    }
                    jitters.push(inbound.jitter * 1000.0);
                }
                _ => {}
            }
        }
    }

    snapshot.rtt_ms_bits.store(mean(&rtts).to_bits(), Ordering::Relaxed);
    snapshot
        .loss_ratio_bits
        .store(mean(&loss_ratios).to_bits(), Ordering::Relaxed);
    snapshot.jitter_ms_bits.store(mean(&jitters).to_bits(), Ordering::Relaxed);
    snapshot.peer_count.store(peers.len() as u64, Ordering::Relaxed);

    debug!(
        peers = peers.len(),
        rtt_ms = mean(&rtts),
        loss = mean(&loss_ratios),
        jitter_ms = mean(&jitters),
        "stats snapshot updated"
    );
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
