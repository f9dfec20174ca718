//! Signal generators
//!
//! One audio sample per tick; the only state carried across calls is phase
//! (and the ping envelope). Amplitude lives in a [`SharedFloat`] cell so the
//! control thread can change it while the callback renders.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::shared::SharedFloat;

/// Envelope level below which a decaying ping is considered finished
const PING_ENVELOPE_CUTOFF: f32 = 1.0e-4;

/// Sine oscillator
#[derive(Debug)]
pub struct SineOscillator {
    phase: f32,
    increment: f32,
    amplitude: SharedFloat,
}

impl SineOscillator {
    pub fn new(sample_rate: u32, frequency: f32, amplitude: SharedFloat) -> Self {
        Self {
            phase: 0.0,
            increment: frequency / sample_rate as f32,
            amplitude,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let sample = (self.phase * TAU).sin() * self.amplitude.get();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }
}

/// Naive sawtooth oscillator (-1.0 to 1.0 ramp)
#[derive(Debug)]
pub struct SawtoothOscillator {
    phase: f32,
    increment: f32,
    amplitude: SharedFloat,
}

impl SawtoothOscillator {
    pub fn new(sample_rate: u32, frequency: f32, amplitude: SharedFloat) -> Self {
        Self {
            phase: 0.0,
            increment: frequency / sample_rate as f32,
            amplitude,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let sample = (2.0 * self.phase - 1.0) * self.amplitude.get();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }
}

/// Periodic single-sample impulse, for visualizing ringing and latency on a
/// scope.
#[derive(Debug)]
pub struct ImpulseOscillator {
    period_frames: usize,
    position: usize,
    amplitude: SharedFloat,
}

impl ImpulseOscillator {
    pub fn new(sample_rate: u32, frequency: f32, amplitude: SharedFloat) -> Self {
        let period_frames = (sample_rate as f32 / frequency.max(0.01)) as usize;
        Self {
            period_frames: period_frames.max(1),
            position: 0,
            amplitude,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let sample = if self.position == 0 {
            self.amplitude.get()
        } else {
            0.0
        };
        self.position = (self.position + 1) % self.period_frames;
        sample
    }
}

/// One-shot decaying sawtooth burst with a very sharp attack.
///
/// Fired on demand through the shared trigger flag; used to measure
/// output-only latency against an external reference (tap-to-tone). Between
/// triggers the generator is silent.
#[derive(Debug)]
pub struct SawPingGenerator {
    phase: f32,
    increment: f32,
    envelope: f32,
    decay: f32,
    amplitude: SharedFloat,
    trigger: Arc<AtomicBool>,
}

impl SawPingGenerator {
    /// `decay_seconds` is the envelope's 1/e time constant.
    pub fn new(
        sample_rate: u32,
        frequency: f32,
        decay_seconds: f32,
        amplitude: SharedFloat,
        trigger: Arc<AtomicBool>,
    ) -> Self {
        Self {
            phase: 0.0,
            increment: frequency / sample_rate as f32,
            envelope: 0.0,
            decay: (-1.0 / (decay_seconds * sample_rate as f32)).exp(),
            amplitude,
            trigger,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        if self.trigger.swap(false, Ordering::AcqRel) {
            self.envelope = 1.0;
            self.phase = 0.0;
        }
        if self.envelope < PING_ENVELOPE_CUTOFF {
            return 0.0;
        }
        let sample = (2.0 * self.phase - 1.0) * self.envelope * self.amplitude.get();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        self.envelope *= self.decay;
        sample
    }
}

/// Closed set of generator kinds composed into a flow graph.
#[derive(Debug)]
pub enum Generator {
    Sine(SineOscillator),
    Sawtooth(SawtoothOscillator),
    Impulse(ImpulseOscillator),
    SawPing(SawPingGenerator),
}

impl Generator {
    pub fn next_sample(&mut self) -> f32 {
        match self {
            Generator::Sine(g) => g.next_sample(),
            Generator::Sawtooth(g) => g.next_sample(),
            Generator::Impulse(g) => g.next_sample(),
            Generator::SawPing(g) => g.next_sample(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_stays_within_amplitude() {
        let mut osc = SineOscillator::new(48000, 440.0, SharedFloat::new(0.5));
        for _ in 0..48000 {
            assert!(osc.next_sample().abs() <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_sine_period() {
        // 1000 Hz at 48 kHz: one full cycle every 48 samples
        let mut osc = SineOscillator::new(48000, 1000.0, SharedFloat::new(1.0));
        let first = osc.next_sample();
        for _ in 0..47 {
            osc.next_sample();
        }
        assert_relative_eq!(osc.next_sample(), first, epsilon = 1e-3);
    }

    #[test]
    fn test_amplitude_change_applies_immediately() {
        let amplitude = SharedFloat::new(1.0);
        let mut osc = SawtoothOscillator::new(48000, 440.0, amplitude.clone());
        osc.next_sample();
        amplitude.set(0.0);
        for _ in 0..100 {
            assert_eq!(osc.next_sample(), 0.0);
        }
    }

    #[test]
    fn test_impulse_fires_once_per_period() {
        let mut osc = ImpulseOscillator::new(48000, 2.0, SharedFloat::new(0.7));
        let mut non_zero = 0;
        for _ in 0..48000 {
            if osc.next_sample() != 0.0 {
                non_zero += 1;
            }
        }
        assert_eq!(non_zero, 2);
    }

    #[test]
    fn test_ping_silent_until_triggered() {
        let trigger = Arc::new(AtomicBool::new(false));
        let mut ping =
            SawPingGenerator::new(48000, 800.0, 0.1, SharedFloat::new(0.8), trigger.clone());

        for _ in 0..1000 {
            assert_eq!(ping.next_sample(), 0.0);
        }

        trigger.store(true, Ordering::Release);
        let mut energy = 0.0f32;
        for _ in 0..4800 {
            energy += ping.next_sample().abs();
        }
        assert!(energy > 1.0, "Triggered ping should produce signal");
    }

    #[test]
    fn test_ping_decays_back_to_silence() {
        let trigger = Arc::new(AtomicBool::new(true));
        let mut ping =
            SawPingGenerator::new(48000, 800.0, 0.05, SharedFloat::new(0.8), trigger);

        // One second is many time constants at 50ms decay
        for _ in 0..48000 {
            ping.next_sample();
        }
        for _ in 0..100 {
            assert_eq!(ping.next_sample(), 0.0);
        }
    }
}
