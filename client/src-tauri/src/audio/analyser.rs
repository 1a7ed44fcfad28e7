//! RMS analyser and voice-activity gate (component C, §4.C/§8).
//!
//! The browser original clones each track into an analyser source so RMS
//! sampling keeps working even while `track.enabled` is false (muted); we
//! reproduce that decoupling by feeding the analyser from the pre-gain,
//! pre-mute sample stream — never from what actually reaches the speaker
//! or the outbound track.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::consts::{SPEAKING_RMS_THRESHOLD, VA_HOLD_OPEN, VA_THRESHOLD_MAX, VA_THRESHOLD_MIN};

/// Per-source RMS + speaking-flag state, updated every analyser tick.
#[derive(Default)]
pub struct Analyser {
    rms_bits: std::sync::atomic::AtomicU32,
    speaking: AtomicBool,
}

impl Analyser {
    pub fn new() -> Self {
        Self {
            rms_bits: std::sync::atomic::AtomicU32::new(0),
            speaking: AtomicBool::new(false),
        }
    }

    /// Compute RMS over one tick's worth of samples and update the
    /// speaking flag at the fixed threshold.
    pub fn tick(&self, samples: &[f32]) -> f32 {
        let rms = rms_of(samples);
        self.rms_bits.store(rms.to_bits(), Ordering::Relaxed);
        self.speaking
            .store(rms > SPEAKING_RMS_THRESHOLD, Ordering::Relaxed);
        rms
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms_bits.load(Ordering::Relaxed))
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Force the speaking flag, bypassing RMS — used in PTT mode where the
    /// local speaking indicator mirrors `ptt_active ∧ ¬muted` instead.
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Relaxed);
    }
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Voice-activity gate for the local microphone. Holds the mic track
/// enabled for `VA_HOLD_OPEN` after the RMS last crossed the sensitivity
/// threshold, to avoid toggling during natural speech pauses.
pub struct VoiceActivityGate {
    sensitivity: std::sync::atomic::AtomicU32,
    last_above_threshold: std::sync::Mutex<Option<Instant>>,
    ticks_since_start: AtomicU64,
}

impl VoiceActivityGate {
    pub fn new(sensitivity: f32) -> Self {
        Self {
            sensitivity: std::sync::atomic::AtomicU32::new(sensitivity.to_bits()),
            last_above_threshold: std::sync::Mutex::new(None),
            ticks_since_start: AtomicU64::new(0),
        }
    }

    pub fn set_sensitivity(&self, sensitivity: f32) {
        self.sensitivity
            .store(sensitivity.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn threshold(&self) -> f32 {
        let sensitivity = f32::from_bits(self.sensitivity.load(Ordering::Relaxed));
        VA_THRESHOLD_MAX - (VA_THRESHOLD_MAX - VA_THRESHOLD_MIN) * sensitivity
    }

    /// Feed one tick's RMS; returns whether the mic track should be
    /// enabled (`¬muted ∧ within the hold-open window`).
    pub fn tick(&self, rms: f32, muted: bool) -> bool {
        self.ticks_since_start.fetch_add(1, Ordering::Relaxed);
        if rms >= self.threshold() {
            *self.last_above_threshold.lock().unwrap() = Some(Instant::now());
        }

        if muted {
            return false;
        }

        match *self.last_above_threshold.lock().unwrap() {
            Some(t) => t.elapsed() < VA_HOLD_OPEN,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_of(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn speaking_flag_follows_threshold() {
        let analyser = Analyser::new();
        analyser.tick(&[0.0; 100]);
        assert!(!analyser.is_speaking());

        let loud = vec![0.1f32; 100];
        analyser.tick(&loud);
        assert!(analyser.is_speaking());
    }

    #[test]
    fn gate_opens_above_threshold_and_holds_briefly_after() {
        let gate = VoiceActivityGate::new(0.5);
        assert!(gate.tick(0.04, false));
        // Immediately after dropping below threshold, still inside the
        // 200 ms hold-open window.
        assert!(gate.tick(0.0, false));
    }

    #[test]
    fn gate_stays_closed_while_muted() {
        let gate = VoiceActivityGate::new(0.5);
        assert!(!gate.tick(0.04, true));
    }

    #[test]
    fn threshold_interpolates_with_sensitivity() {
        let gate = VoiceActivityGate::new(0.0);
        assert!((gate.threshold() - VA_THRESHOLD_MAX).abs() < 1e-6);
        gate.set_sensitivity(1.0);
        assert!((gate.threshold() - VA_THRESHOLD_MIN).abs() < 1e-6);
    }
}
