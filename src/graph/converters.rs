//! Channel converters
//!
//! Adapt generator outputs to the stream's negotiated channel count. A muted
//! channel outputs zero but its generator keeps ticking, so re-enabling
//! resumes at the current phase and amplitude without a rebuild.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::oscillators::Generator;

/// Per-channel enable flags shared between the control thread and the
/// rendering callback. Out-of-range channel indices are ignored on write and
/// read as enabled.
#[derive(Debug, Clone)]
pub struct ChannelEnables {
    flags: Arc<[AtomicBool]>,
}

impl ChannelEnables {
    pub fn new(capacity: usize) -> Self {
        let flags: Vec<AtomicBool> = (0..capacity).map(|_| AtomicBool::new(true)).collect();
        Self {
            flags: flags.into(),
        }
    }

    pub fn set(&self, channel: usize, enabled: bool) {
        if let Some(flag) = self.flags.get(channel) {
            flag.store(enabled, Ordering::Release);
        }
    }

    pub fn is_enabled(&self, channel: usize) -> bool {
        self.flags
            .get(channel)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(true)
    }
}

/// One generator per output channel.
#[derive(Debug)]
pub struct ManyToMultiConverter {
    generators: Vec<Generator>,
    enables: ChannelEnables,
}

impl ManyToMultiConverter {
    pub fn new(generators: Vec<Generator>, enables: ChannelEnables) -> Self {
        Self { generators, enables }
    }

    /// Produce one frame. Channels beyond the generator count are silent.
    pub fn next_frame(&mut self, frame: &mut [f32]) {
        for (channel, slot) in frame.iter_mut().enumerate() {
            *slot = match self.generators.get_mut(channel) {
                Some(generator) => {
                    let sample = generator.next_sample();
                    if self.enables.is_enabled(channel) {
                        sample
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };
        }
    }
}

/// A single generator fanned out to every output channel.
#[derive(Debug)]
pub struct MonoToMultiConverter {
    source: Generator,
    enables: ChannelEnables,
}

impl MonoToMultiConverter {
    pub fn new(source: Generator, enables: ChannelEnables) -> Self {
        Self { source, enables }
    }

    pub fn next_frame(&mut self, frame: &mut [f32]) {
        let sample = self.source.next_sample();
        for (channel, slot) in frame.iter_mut().enumerate() {
            *slot = if self.enables.is_enabled(channel) {
                sample
            } else {
                0.0
            };
        }
    }
}

/// Converter stage of a flow graph.
#[derive(Debug)]
pub enum Converter {
    ManyToMulti(ManyToMultiConverter),
    MonoToMulti(MonoToMultiConverter),
}

impl Converter {
    pub fn next_frame(&mut self, frame: &mut [f32]) {
        match self {
            Converter::ManyToMulti(c) => c.next_frame(frame),
            Converter::MonoToMulti(c) => c.next_frame(frame),
        }
    }
}
