//! Glitch detection
//!
//! Emits a steady sine reference on the output side and compares the input
//! against a prediction generated in lockstep. After a short quadrature
//! lock of the loopback's amplitude and phase, every input sample is checked
//! against the predicted waveform; a sample outside tolerance counts one
//! glitch and forces a re-lock, so a single discontinuity is counted once
//! rather than once per sample.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::analyzer::DuplexProcessor;

/// Reference tone frequency in Hz
const SIGNAL_FREQUENCY: f64 = 660.0;

/// Reference tone amplitude (-6dB for headroom)
const SIGNAL_AMPLITUDE: f32 = 0.5;

/// Quadrature lock window in frames
const LOCK_FRAMES: usize = 2048;

/// Input magnitude that counts as "signal present"
const SIGNAL_THRESHOLD: f32 = 0.05;

/// Error tolerance as a fraction of the locked amplitude
const TOLERANCE_RATIO: f32 = 0.2;

/// Error tolerance floor
const MIN_TOLERANCE: f32 = 0.02;

/// Glitch analyzer state machine position.
///
/// Stable host contract values: Idle = 0, WaitingForSignal = 1,
/// Measuring = 2, Done = 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlitchState {
    Idle,
    WaitingForSignal,
    Measuring,
    Done,
}

impl GlitchState {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::WaitingForSignal => 1,
            Self::Measuring => 2,
            Self::Done => 3,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::WaitingForSignal,
            2 => Self::Measuring,
            3 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// Atomic snapshot shared between the callback (writer) and the control
/// thread. The control thread writes exactly once: the terminal Done
/// transition on stop.
#[derive(Debug)]
pub struct GlitchShared {
    state: AtomicI32,
    glitch_count: AtomicU32,
    reset_count: AtomicU32,
}

impl GlitchShared {
    pub fn new() -> Self {
        Self {
            state: AtomicI32::new(GlitchState::Idle.as_raw()),
            glitch_count: AtomicU32::new(0),
            reset_count: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> GlitchState {
        GlitchState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Total detected discontinuities.
    pub fn glitch_count(&self) -> u32 {
        self.glitch_count.load(Ordering::Acquire)
    }

    /// Times the tracker had to re-synchronize.
    pub fn reset_count(&self) -> u32 {
        self.reset_count.load(Ordering::Acquire)
    }

    /// Terminal transition, called by the activity on stop.
    pub fn finish(&self) {
        self.state
            .store(GlitchState::Done.as_raw(), Ordering::Release);
    }

    fn set_state(&self, state: GlitchState) {
        self.state.store(state.as_raw(), Ordering::Release);
    }
}

impl Default for GlitchShared {
    fn default() -> Self {
        Self::new()
    }
}

enum TrackerMode {
    Waiting,
    Locking {
        sin_acc: f64,
        cos_acc: f64,
        remaining: usize,
    },
    Measuring {
        amplitude: f32,
        phase_offset: f64,
    },
}

/// Full-duplex glitch analyzer.
pub struct GlitchAnalyzer {
    shared: Arc<GlitchShared>,
    phase: f64,
    increment: f64,
    mode: TrackerMode,
    started: bool,
}

impl GlitchAnalyzer {
    pub fn new(sample_rate: u32, shared: Arc<GlitchShared>) -> Self {
        Self {
            shared,
            phase: 0.0,
            increment: SIGNAL_FREQUENCY * std::f64::consts::TAU / sample_rate as f64,
            mode: TrackerMode::Waiting,
            started: false,
        }
    }

    fn begin_lock(&mut self) {
        self.mode = TrackerMode::Locking {
            sin_acc: 0.0,
            cos_acc: 0.0,
            remaining: LOCK_FRAMES,
        };
    }
}

impl DuplexProcessor for GlitchAnalyzer {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        if self.shared.state() == GlitchState::Done {
            output.fill(0.0);
            return;
        }
        if !self.started {
            self.started = true;
            self.shared.set_state(GlitchState::WaitingForSignal);
        }

        for (&x, y) in input.iter().zip(output.iter_mut()) {
            *y = (self.phase.sin() as f32) * SIGNAL_AMPLITUDE;

            match &mut self.mode {
                TrackerMode::Waiting => {
                    if x.abs() > SIGNAL_THRESHOLD {
                        self.begin_lock();
                    }
                }
                TrackerMode::Locking {
                    sin_acc,
                    cos_acc,
                    remaining,
                } => {
                    *sin_acc += x as f64 * self.phase.sin();
                    *cos_acc += x as f64 * self.phase.cos();
                    *remaining -= 1;
                    if *remaining == 0 {
                        let n = LOCK_FRAMES as f64;
                        let amplitude =
                            (2.0 * (*sin_acc * *sin_acc + *cos_acc * *cos_acc).sqrt() / n) as f32;
                        let phase_offset = cos_acc.atan2(*sin_acc);
                        if amplitude > SIGNAL_THRESHOLD {
                            self.mode = TrackerMode::Measuring {
                                amplitude,
                                phase_offset,
                            };
                            self.shared.set_state(GlitchState::Measuring);
                            tracing::debug!(amplitude, phase_offset, "Glitch tracker locked");
                        } else {
                            self.mode = TrackerMode::Waiting;
                        }
                    }
                }
                TrackerMode::Measuring {
                    amplitude,
                    phase_offset,
                } => {
                    let predicted = *amplitude * ((self.phase + *phase_offset).sin() as f32);
                    let tolerance = (TOLERANCE_RATIO * *amplitude).max(MIN_TOLERANCE);
                    if (x - predicted).abs() > tolerance {
                        self.shared.glitch_count.fetch_add(1, Ordering::AcqRel);
                        self.shared.reset_count.fetch_add(1, Ordering::AcqRel);
                        self.shared.set_state(GlitchState::WaitingForSignal);
                        self.mode = TrackerMode::Waiting;
                    }
                }
            }

            self.phase += self.increment;
            if self.phase >= std::f64::consts::TAU {
                self.phase -= std::f64::consts::TAU;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 256;

    /// Run the analyzer over an immediate loopback for `blocks` buffers,
    /// applying `corrupt` to each input sample index.
    fn run_loopback<F>(blocks: usize, mut corrupt: F) -> Arc<GlitchShared>
    where
        F: FnMut(usize, f32) -> f32,
    {
        let shared = Arc::new(GlitchShared::new());
        let mut analyzer = GlitchAnalyzer::new(48000, Arc::clone(&shared));

        let mut previous = vec![0.0f32; BLOCK];
        let mut output = vec![0.0f32; BLOCK];
        let mut index = 0usize;

        for _ in 0..blocks {
            let input: Vec<f32> = previous
                .iter()
                .map(|&s| {
                    let corrupted = corrupt(index, s);
                    index += 1;
                    corrupted
                })
                .collect();
            analyzer.process(&input, &mut output);
            previous.copy_from_slice(&output);
        }
        shared
    }

    #[test]
    fn test_clean_loopback_has_zero_glitches() {
        // Two seconds of perfect reproduction
        let shared = run_loopback(48000 * 2 / BLOCK, |_, s| s);
        assert_eq!(shared.state(), GlitchState::Measuring);
        assert_eq!(shared.glitch_count(), 0);
    }

    #[test]
    fn test_single_discontinuity_counts_once() {
        // Spike one sample well after the tracker locked (~0.05s in)
        let spike_at = 24000;
        let shared = run_loopback(48000 * 2 / BLOCK, |i, s| {
            if i == spike_at {
                s + 0.4
            } else {
                s
            }
        });
        assert_eq!(
            shared.glitch_count(),
            1,
            "A single spike should count exactly one glitch"
        );
        assert!(shared.reset_count() >= 1);
        // Tracker re-locked and kept measuring afterwards
        assert_eq!(shared.state(), GlitchState::Measuring);
    }

    #[test]
    fn test_two_separated_discontinuities_count_twice() {
        let shared = run_loopback(48000 * 3 / BLOCK, |i, s| {
            if i == 24000 || i == 96000 {
                s + 0.4
            } else {
                s
            }
        });
        assert_eq!(shared.glitch_count(), 2);
        assert!(shared.reset_count() >= 2);
    }

    #[test]
    fn test_finish_is_terminal() {
        let shared = Arc::new(GlitchShared::new());
        let mut analyzer = GlitchAnalyzer::new(48000, Arc::clone(&shared));
        shared.finish();

        let input = vec![0.5f32; BLOCK];
        let mut output = vec![1.0f32; BLOCK];
        analyzer.process(&input, &mut output);

        assert_eq!(shared.state(), GlitchState::Done);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_state_raw_values_are_stable() {
        assert_eq!(GlitchState::Idle.as_raw(), 0);
        assert_eq!(GlitchState::WaitingForSignal.as_raw(), 1);
        assert_eq!(GlitchState::Measuring.as_raw(), 2);
        assert_eq!(GlitchState::Done.as_raw(), 3);
    }
}
