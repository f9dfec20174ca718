//! Echo processor
//!
//! Copies delayed input into the output buffer through a circular delay
//! line. The delay length is adjustable from the control thread while the
//! stream runs; a change takes effect on the next callback through a short
//! linear cross-fade between the old and new taps, so there is no audible
//! click at the transition.

use crate::analyzer::DuplexProcessor;
use crate::shared::SharedFloat;

/// Upper bound on the delay line length
pub const MAX_DELAY_SECONDS: f32 = 3.0;

/// Cross-fade length applied when the delay changes
const FADE_SECONDS: f32 = 0.05;

pub struct EchoProcessor {
    line: Vec<f32>,
    write_pos: usize,
    current_delay: usize,
    delay_seconds: SharedFloat,
    sample_rate: u32,
    fade_from: usize,
    fade_remaining: usize,
    fade_length: usize,
}

impl EchoProcessor {
    /// `delay_seconds` is the shared cell the control thread writes through
    /// `set_delay_time`; the initial value seeds the starting delay.
    pub fn new(sample_rate: u32, delay_seconds: SharedFloat) -> Self {
        let capacity = (MAX_DELAY_SECONDS * sample_rate as f32) as usize + 1;
        let fade_length = ((FADE_SECONDS * sample_rate as f32) as usize).max(1);
        let current_delay = Self::frames_for(delay_seconds.get(), sample_rate, capacity);
        Self {
            line: vec![0.0; capacity],
            write_pos: 0,
            current_delay,
            delay_seconds,
            sample_rate,
            fade_from: current_delay,
            fade_remaining: 0,
            fade_length,
        }
    }

    fn frames_for(seconds: f32, sample_rate: u32, capacity: usize) -> usize {
        let frames = (seconds.max(0.0) * sample_rate as f32) as usize;
        frames.min(capacity - 1)
    }

    fn tap(&self, delay: usize) -> f32 {
        let capacity = self.line.len();
        self.line[(self.write_pos + capacity - delay) % capacity]
    }

    pub fn current_delay_frames(&self) -> usize {
        self.current_delay
    }
}

impl DuplexProcessor for EchoProcessor {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let target = Self::frames_for(self.delay_seconds.get(), self.sample_rate, self.line.len());
        if target != self.current_delay && self.fade_remaining == 0 {
            self.fade_from = self.current_delay;
            self.current_delay = target;
            self.fade_remaining = self.fade_length;
        }

        let capacity = self.line.len();
        for (&x, y) in input.iter().zip(output.iter_mut()) {
            // Tap positions are relative to the sample just written, so a
            // delay of D frames yields out[n] = in[n - D] exactly
            self.line[self.write_pos] = x;

            let sample = self.tap(self.current_delay);
            *y = if self.fade_remaining > 0 {
                let t = self.fade_remaining as f32 / self.fade_length as f32;
                self.fade_remaining -= 1;
                self.tap(self.fade_from) * t + sample * (1.0 - t)
            } else {
                sample
            };

            self.write_pos = (self.write_pos + 1) % capacity;
        }
    }
}
