//! Round-trip latency measurement
//!
//! Emits a known noise-burst probe on the output side and finds its arrival
//! on the input side. Detection is two-stage:
//! - an envelope follower over an adaptive noise floor gates each probe
//!   cycle (cheap, per-sample), so cycles with no audible arrival skip the
//!   correlation entirely;
//! - FFT cross-correlation of the captured window against the probe refines
//!   the arrival to one frame and yields a confidence score.
//!
//! The analyzer is a bounded state machine: it reaches Done once enough
//! consistent measurements accumulate, or Failed after a fixed number of
//! unsuccessful cycles. It never hangs, and failure to measure is a state,
//! not an error.
//!
//! All per-buffer work is allocation-free: FFT plans and scratch are created
//! up front and the one-shot correlation runs at most once per probe cycle.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;

use crate::analyzer::DuplexProcessor;

/// Probe burst length in frames (~43ms at 48kHz)
const PROBE_FRAMES: usize = 2048;

/// Captured window per cycle; latency beyond CAPTURE_FRAMES - PROBE_FRAMES
/// is not measurable
const CAPTURE_FRAMES: usize = 8192;

/// Silence emitted before the first probe so the noise floor can settle
const PRIME_SECONDS: f32 = 0.25;

/// Probe cycle length in seconds (burst + listen window)
const CYCLE_SECONDS: f32 = 0.5;

/// Probe amplitude (-6dB for headroom)
const PROBE_AMPLITUDE: f32 = 0.5;

/// Minimum normalized correlation for a measurement to count
const MIN_CONFIDENCE: f32 = 0.3;

/// Consistent measurements required before Done
const REQUIRED_MEASUREMENTS: usize = 3;

/// Spread allowed between the consistent measurements, in frames
const CONSISTENCY_TOLERANCE_FRAMES: usize = 512;

/// Cycles without an accepted measurement before Failed
const MAX_FAILED_CYCLES: u32 = 8;

/// Total cycles (accepted or not) before Failed
const MAX_TOTAL_CYCLES: u32 = 16;

/// Analyzer state machine position.
///
/// Stable host contract values: Idle = 0, Priming = 1, Measuring = 2,
/// Done = 3, Failed = 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyState {
    Idle,
    Priming,
    Measuring,
    Done,
    Failed,
}

impl LatencyState {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::Priming => 1,
            Self::Measuring => 2,
            Self::Done => 3,
            Self::Failed => 4,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Priming,
            2 => Self::Measuring,
            3 => Self::Done,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// Terminal states: Done or Failed.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Atomic snapshot of the analyzer, shared between the callback (writer) and
/// the control thread (reader).
#[derive(Debug)]
pub struct RoundTripShared {
    state: AtomicI32,
    result_frames: AtomicI32,
    confidence_bits: AtomicU32,
    reset_count: AtomicU32,
}

impl RoundTripShared {
    pub fn new() -> Self {
        Self {
            state: AtomicI32::new(LatencyState::Idle.as_raw()),
            result_frames: AtomicI32::new(0),
            confidence_bits: AtomicU32::new(0.0f32.to_bits()),
            reset_count: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> LatencyState {
        LatencyState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Measured round-trip latency in frames; 0 until Done.
    pub fn result_frames(&self) -> i32 {
        self.result_frames.load(Ordering::Acquire)
    }

    pub fn confidence(&self) -> f32 {
        f32::from_bits(self.confidence_bits.load(Ordering::Acquire))
    }

    /// Number of probe cycles that produced no accepted measurement.
    pub fn reset_count(&self) -> u32 {
        self.reset_count.load(Ordering::Acquire)
    }

    fn set_state(&self, state: LatencyState) {
        self.state.store(state.as_raw(), Ordering::Release);
    }
}

impl Default for RoundTripShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Completed measurement, serializable for the host.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    pub latency_frames: i32,
    pub latency_ms: f64,
    pub confidence: f32,
    pub completed_at: DateTime<Local>,
}

/// Envelope-follower onset gate over an adaptive noise floor.
///
/// Fast attack, slow release; an onset fires when the envelope rises a fixed
/// ratio above the tracked floor.
#[derive(Debug)]
struct OnsetDetector {
    envelope: f32,
    noise_floor: f32,
    attack_coeff: f32,
    release_coeff: f32,
    floor_coeff: f32,
    threshold_ratio: f32,
    above: bool,
}

impl OnsetDetector {
    fn new(sample_rate: u32) -> Self {
        let coeff = |time_ms: f32| (-1000.0 / (time_ms * sample_rate as f32)).exp();
        Self {
            envelope: 0.0,
            noise_floor: 0.001,
            attack_coeff: coeff(0.5),
            release_coeff: coeff(10.0),
            floor_coeff: coeff(100.0),
            threshold_ratio: 10.0,
            above: false,
        }
    }

    /// Process one sample; true on a rising edge above the threshold.
    fn process(&mut self, sample: f32) -> bool {
        let abs = sample.abs();
        let coeff = if abs > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = self.envelope * coeff + abs * (1.0 - coeff);

        let threshold = self.noise_floor.max(0.001) * self.threshold_ratio;
        if !self.above {
            self.noise_floor = self.noise_floor * self.floor_coeff + abs * (1.0 - self.floor_coeff);
        }

        if !self.above && self.envelope > threshold {
            self.above = true;
            return true;
        }
        if self.above && self.envelope < threshold * 0.5 {
            self.above = false;
        }
        false
    }
}

/// Full-duplex round-trip latency analyzer.
pub struct RoundTripAnalyzer {
    shared: Arc<RoundTripShared>,
    sample_rate: u32,
    state: LatencyState,

    prime_remaining: usize,
    probe: Vec<f32>,
    cycle_frames: usize,
    cycle_pos: usize,

    capture: Vec<f32>,
    capture_len: usize,
    onset: OnsetDetector,
    onset_seen: bool,
    cycle_had_measurement: bool,

    fft_size: usize,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    probe_fft: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    probe_energy: f32,

    measurements: Vec<usize>,
    failed_cycles: u32,
    total_cycles: u32,
}

impl RoundTripAnalyzer {
    pub fn new(sample_rate: u32, shared: Arc<RoundTripShared>) -> Self {
        let probe = Self::generate_probe();
        let probe_energy: f32 = probe.iter().map(|x| x * x).sum();

        let fft_size = (CAPTURE_FRAMES * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);

        // Pre-compute the conjugated probe spectrum for correlation
        let mut probe_fft: Vec<Complex<f32>> = probe
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_size)
            .collect();
        fft_forward.process(&mut probe_fft);
        for c in &mut probe_fft {
            c.im = -c.im;
        }

        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        Self {
            shared,
            sample_rate,
            state: LatencyState::Idle,
            prime_remaining: (PRIME_SECONDS * sample_rate as f32) as usize,
            probe,
            cycle_frames: ((CYCLE_SECONDS * sample_rate as f32) as usize).max(CAPTURE_FRAMES + 1),
            cycle_pos: 0,
            capture: vec![0.0; CAPTURE_FRAMES],
            capture_len: 0,
            onset: OnsetDetector::new(sample_rate),
            onset_seen: false,
            cycle_had_measurement: false,
            fft_size,
            fft_forward,
            fft_inverse,
            probe_fft,
            work: vec![Complex::new(0.0, 0.0); fft_size],
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            probe_energy,
            // Sized for the cycle budget so the callback never reallocates
            measurements: Vec::with_capacity(MAX_TOTAL_CYCLES as usize),
            failed_cycles: 0,
            total_cycles: 0,
        }
    }

    /// Deterministic white-noise burst via LCG, -6dB amplitude.
    fn generate_probe() -> Vec<f32> {
        let mut seed: u32 = 0xDEADBEEF;
        (0..PROBE_FRAMES)
            .map(|_| {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                let bits = (seed >> 16) & 0x7FFF;
                ((bits as f32 / 16384.0) - 1.0) * PROBE_AMPLITUDE
            })
            .collect()
    }

    fn set_state(&mut self, state: LatencyState) {
        self.state = state;
        self.shared.set_state(state);
    }

    fn begin_cycle(&mut self) {
        self.cycle_pos = 0;
        self.capture_len = 0;
        self.onset_seen = false;
        self.cycle_had_measurement = false;
    }

    fn end_cycle(&mut self) {
        self.total_cycles += 1;
        if !self.cycle_had_measurement {
            self.failed_cycles += 1;
            self.shared.reset_count.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(
                failed = self.failed_cycles,
                total = self.total_cycles,
                "Probe cycle produced no measurement"
            );
        }

        if self.state != LatencyState::Measuring {
            return;
        }
        if self.failed_cycles >= MAX_FAILED_CYCLES || self.total_cycles >= MAX_TOTAL_CYCLES {
            self.shared.result_frames.store(0, Ordering::Release);
            self.set_state(LatencyState::Failed);
            tracing::info!(
                failed = self.failed_cycles,
                total = self.total_cycles,
                "Latency measurement failed"
            );
        } else {
            self.begin_cycle();
        }
    }

    /// One-shot correlation of the captured window against the probe.
    /// Returns (lag, confidence).
    fn correlate(&mut self) -> (usize, f32) {
        for (slot, &sample) in self.work.iter_mut().zip(self.capture.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        for slot in self.work.iter_mut().skip(self.capture.len()) {
            *slot = Complex::new(0.0, 0.0);
        }

        self.fft_forward
            .process_with_scratch(&mut self.work, &mut self.fft_scratch);
        for (w, p) in self.work.iter_mut().zip(&self.probe_fft) {
            *w *= *p;
        }
        self.fft_inverse
            .process_with_scratch(&mut self.work, &mut self.fft_scratch);

        let norm = 1.0 / self.fft_size as f32;
        let search_limit = CAPTURE_FRAMES - PROBE_FRAMES;
        let mut best_lag = 0;
        let mut best_val = 0.0f32;
        for (lag, c) in self.work.iter().take(search_limit).enumerate() {
            let val = (c.re * norm).abs();
            if val > best_val {
                best_val = val;
                best_lag = lag;
            }
        }

        let capture_energy: f32 = self.capture.iter().map(|x| x * x).sum();
        let confidence = best_val / ((self.probe_energy * capture_energy).sqrt() + 1e-9);
        (best_lag, confidence.clamp(0.0, 1.0))
    }

    /// Capture window complete: correlate and judge the measurement.
    fn finish_capture(&mut self) {
        if !self.onset_seen {
            // Nothing audible arrived; skip the FFT, the cycle fails at its end
            return;
        }

        let (lag, confidence) = self.correlate();
        if confidence < MIN_CONFIDENCE || lag == 0 {
            tracing::debug!(lag, confidence, "Correlation below confidence threshold");
            return;
        }

        self.cycle_had_measurement = true;
        self.measurements.push(lag);
        tracing::debug!(lag, confidence, count = self.measurements.len(), "Latency measurement");

        if self.measurements.len() >= REQUIRED_MEASUREMENTS {
            let recent = &self.measurements[self.measurements.len() - REQUIRED_MEASUREMENTS..];
            let min = *recent.iter().min().unwrap_or(&0);
            let max = *recent.iter().max().unwrap_or(&0);
            if max - min <= CONSISTENCY_TOLERANCE_FRAMES {
                let mut sorted: Vec<usize> = recent.to_vec();
                sorted.sort_unstable();
                let median = sorted[sorted.len() / 2];

                self.shared
                    .result_frames
                    .store(median as i32, Ordering::Release);
                self.shared
                    .confidence_bits
                    .store(confidence.to_bits(), Ordering::Release);
                self.set_state(LatencyState::Done);
                tracing::info!(
                    latency_frames = median,
                    latency_ms = median as f64 / self.sample_rate as f64 * 1000.0,
                    confidence,
                    "Round-trip latency measured"
                );
            }
        }
    }
}

impl DuplexProcessor for RoundTripAnalyzer {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        match self.state {
            LatencyState::Idle => {
                output.fill(0.0);
                self.prime_remaining = (PRIME_SECONDS * self.sample_rate as f32) as usize;
                self.set_state(LatencyState::Priming);
            }
            LatencyState::Priming => {
                output.fill(0.0);
                for &sample in input {
                    self.onset.process(sample);
                }
                if self.prime_remaining <= input.len() {
                    self.prime_remaining = 0;
                    self.begin_cycle();
                    self.set_state(LatencyState::Measuring);
                } else {
                    self.prime_remaining -= input.len();
                }
            }
            LatencyState::Measuring => {
                for (&x, y) in input.iter().zip(output.iter_mut()) {
                    *y = if self.cycle_pos < self.probe.len() {
                        self.probe[self.cycle_pos]
                    } else {
                        0.0
                    };

                    if self.capture_len < self.capture.len() {
                        self.capture[self.capture_len] = x;
                        self.capture_len += 1;
                        if self.onset.process(x) {
                            self.onset_seen = true;
                        }
                        if self.capture_len == self.capture.len() {
                            self.finish_capture();
                        }
                    }

                    self.cycle_pos += 1;
                    if self.cycle_pos >= self.cycle_frames {
                        self.end_cycle();
                        if self.state != LatencyState::Measuring {
                            // Terminal state reached mid-buffer; silence the rest
                            break;
                        }
                    }
                }
                if self.state.is_done() {
                    output.fill(0.0);
                }
            }
            LatencyState::Done | LatencyState::Failed => {
                output.fill(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const BLOCK: usize = 256;

    /// Drive the analyzer through a simulated loopback that delays output by
    /// `delay_frames`, for at most `max_blocks` blocks.
    fn run_loopback(delay_frames: usize, max_blocks: usize) -> Arc<RoundTripShared> {
        let shared = Arc::new(RoundTripShared::new());
        let mut analyzer = RoundTripAnalyzer::new(48000, Arc::clone(&shared));

        let mut line: VecDeque<f32> = VecDeque::new();
        line.extend(std::iter::repeat(0.0).take(delay_frames));

        let mut input = vec![0.0f32; BLOCK];
        let mut output = vec![0.0f32; BLOCK];

        for _ in 0..max_blocks {
            for slot in input.iter_mut() {
                *slot = line.pop_front().unwrap_or(0.0);
            }
            analyzer.process(&input, &mut output);
            line.extend(output.iter().copied());
            if shared.state().is_done() {
                break;
            }
        }
        shared
    }

    #[test]
    fn test_known_delay_yields_done_with_correct_latency() {
        let delay = 480; // 10ms at 48kHz
        let shared = run_loopback(delay, 2000);

        assert_eq!(shared.state(), LatencyState::Done);
        let measured = shared.result_frames() as i64;
        assert!(
            (measured - delay as i64).abs() <= BLOCK as i64,
            "Expected ~{} frames, measured {}",
            delay,
            measured
        );
        assert!(shared.confidence() > 0.5);
    }

    #[test]
    fn test_longer_delay_still_measurable() {
        let delay = 3000; // 62.5ms
        let shared = run_loopback(delay, 2000);

        assert_eq!(shared.state(), LatencyState::Done);
        let measured = shared.result_frames() as i64;
        assert!((measured - delay as i64).abs() <= BLOCK as i64);
    }

    #[test]
    fn test_pure_noise_fails_bounded() {
        let shared = Arc::new(RoundTripShared::new());
        let mut analyzer = RoundTripAnalyzer::new(48000, Arc::clone(&shared));

        let mut seed: u32 = 12345;
        let mut input = vec![0.0f32; BLOCK];
        let mut output = vec![0.0f32; BLOCK];

        // Uncorrelated noise on input, bounded number of blocks: the
        // analyzer must reach Failed, never hang
        let mut blocks = 0;
        while !shared.state().is_done() {
            for slot in input.iter_mut() {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                *slot = (((seed >> 16) & 0x7FFF) as f32 / 16384.0 - 1.0) * 0.3;
            }
            analyzer.process(&input, &mut output);
            blocks += 1;
            assert!(
                blocks < 4000,
                "Analyzer did not terminate within the cycle budget"
            );
        }
        assert_eq!(shared.state(), LatencyState::Failed);
        assert_eq!(shared.result_frames(), 0);
        assert!(shared.reset_count() >= 1);
    }

    #[test]
    fn test_silence_fails_bounded() {
        let shared = Arc::new(RoundTripShared::new());
        let mut analyzer = RoundTripAnalyzer::new(48000, Arc::clone(&shared));

        let input = vec![0.0f32; BLOCK];
        let mut output = vec![0.0f32; BLOCK];
        let mut blocks = 0;
        while !shared.state().is_done() {
            analyzer.process(&input, &mut output);
            blocks += 1;
            assert!(blocks < 4000, "Analyzer did not terminate");
        }
        assert_eq!(shared.state(), LatencyState::Failed);
    }

    #[test]
    fn test_state_progression() {
        let shared = Arc::new(RoundTripShared::new());
        let mut analyzer = RoundTripAnalyzer::new(48000, Arc::clone(&shared));
        assert_eq!(shared.state(), LatencyState::Idle);

        let input = vec![0.0f32; BLOCK];
        let mut output = vec![0.0f32; BLOCK];
        analyzer.process(&input, &mut output);
        assert_eq!(shared.state(), LatencyState::Priming);
    }

    #[test]
    fn test_state_raw_values_are_stable() {
        assert_eq!(LatencyState::Idle.as_raw(), 0);
        assert_eq!(LatencyState::Priming.as_raw(), 1);
        assert_eq!(LatencyState::Measuring.as_raw(), 2);
        assert_eq!(LatencyState::Done.as_raw(), 3);
        assert_eq!(LatencyState::Failed.as_raw(), 4);
    }
}
