//! Per-channel peak metering
//!
//! Running peak level with exponential decay, written by the input callback
//! and read by the control thread. Levels are f32 bits in atomics; no locks
//! anywhere near the callback.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Decay time constant in seconds (time for the held peak to fall to 1/e)
const DECAY_SECONDS: f32 = 0.5;

/// Lock-free peak meter. Clones share the same level storage: keep one clone
/// on the control thread and move another into the capture callback.
#[derive(Debug, Clone)]
pub struct PeakMeter {
    levels: Arc<[AtomicU32]>,
    channel_count: usize,
    sample_rate: u32,
}

impl PeakMeter {
    pub fn new(channel_count: usize, sample_rate: u32) -> Self {
        let levels: Vec<AtomicU32> = (0..channel_count.max(1))
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect();
        Self {
            levels: levels.into(),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    /// Feed one interleaved buffer (callback context).
    pub fn process(&self, interleaved: &[f32]) {
        let frames = interleaved.len() / self.channel_count;
        if frames == 0 {
            return;
        }
        let decay = (-(frames as f32) / (DECAY_SECONDS * self.sample_rate as f32)).exp();

        for (channel, level) in self.levels.iter().enumerate() {
            let mut peak = 0.0f32;
            for frame in interleaved.chunks(self.channel_count) {
                peak = peak.max(frame[channel].abs());
            }
            let held = f32::from_bits(level.load(Ordering::Acquire)) * decay;
            level.store(peak.max(held).to_bits(), Ordering::Release);
        }
    }

    /// Current peak for one channel; out-of-range channels read as 0.0.
    pub fn level(&self, channel: usize) -> f32 {
        self.levels
            .get(channel)
            .map(|l| f32::from_bits(l.load(Ordering::Acquire)))
            .unwrap_or(0.0)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_signal() {
        let meter = PeakMeter::new(2, 48000);
        let buffer: Vec<f32> = (0..256).flat_map(|_| [0.8f32, 0.2f32]).collect();
        meter.process(&buffer);
        assert!((meter.level(0) - 0.8).abs() < 1e-6);
        assert!((meter.level(1) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_peak_decays_over_silence() {
        let meter = PeakMeter::new(1, 48000);
        meter.process(&[1.0f32; 64]);
        let initial = meter.level(0);

        // Two seconds of silence
        let silence = [0.0f32; 4800];
        for _ in 0..20 {
            meter.process(&silence);
        }
        assert!(meter.level(0) < initial * 0.05);
    }

    #[test]
    fn test_out_of_range_channel_reads_zero() {
        let meter = PeakMeter::new(2, 48000);
        meter.process(&[1.0f32; 64]);
        assert_eq!(meter.level(7), 0.0);
    }

    #[test]
    fn test_clones_share_levels() {
        let meter = PeakMeter::new(1, 48000);
        let reader = meter.clone();
        meter.process(&[0.6f32; 32]);
        assert!((reader.level(0) - 0.6).abs() < 1e-6);
    }
}
