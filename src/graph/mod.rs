//! Signal flow graph
//!
//! A small rendering pipeline of generators feeding a channel converter
//! feeding exactly one sink, producing one interleaved output buffer per
//! callback. A graph is built fresh for each negotiated output configuration
//! and owned exclusively by the output activity that built it; runtime
//! parameters (amplitude, channel enables, ping trigger) live in shared
//! cells that survive rebuilds.

pub mod converters;
pub mod oscillators;
pub mod sinks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::shared::SharedFloat;
use crate::stream::spec::{SampleFormat, StreamConfig};
use converters::{ChannelEnables, Converter, ManyToMultiConverter, MonoToMultiConverter};
use oscillators::{
    Generator, ImpulseOscillator, SawPingGenerator, SawtoothOscillator, SineOscillator,
};
use sinks::{Sink, SinkFloat, SinkI16};

/// Default amplitude of the sine oscillators
pub const AMPLITUDE_SINE: f32 = 1.0;
/// Default amplitude of the sawtooth oscillators
pub const AMPLITUDE_SAWTOOTH: f32 = 0.5;
/// Default amplitude of the saw-ping burst
pub const AMPLITUDE_SAW_PING: f32 = 0.8;
/// Default amplitude of the impulse generator
pub const AMPLITUDE_IMPULSE: f32 = 0.7;

/// Saw-ping burst frequency in Hz
pub const FREQUENCY_SAW_PING: f32 = 800.0;
/// Saw-ping envelope time constant in seconds
pub const SAW_PING_DECAY_SECONDS: f32 = 0.1;
/// Lowest oscillator frequency; channel `i` plays harmonic `i + 1`
pub const BASE_FREQUENCY: f32 = 330.0;
/// Impulse repetition rate in Hz
pub const FREQUENCY_IMPULSE: f32 = 2.0;

/// Tone selection for the output activities.
///
/// Stable host contract values: SawPing = 0, Sine = 1, Impulse = 2,
/// Sawtooth = 3. Must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToneType {
    SawPing,
    Sine,
    Impulse,
    Sawtooth,
}

impl ToneType {
    /// Map a raw host value; unknown values fall back to `Sine`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::SawPing,
            2 => Self::Impulse,
            3 => Self::Sawtooth,
            _ => Self::Sine,
        }
    }
}

/// Runtime parameter cells shared between the control thread and whatever
/// graph is currently live in the callback.
///
/// Amplitude changes fan out to every generator kind uniformly, including
/// generators on disabled channels, so re-enabling a channel resumes at the
/// current amplitude.
#[derive(Debug, Clone)]
pub struct GraphControls {
    pub sine_amplitude: SharedFloat,
    pub sawtooth_amplitude: SharedFloat,
    pub impulse_amplitude: SharedFloat,
    pub ping_amplitude: SharedFloat,
    pub enables: ChannelEnables,
    pub ping_trigger: Arc<AtomicBool>,
}

impl GraphControls {
    pub fn new() -> Self {
        Self {
            sine_amplitude: SharedFloat::new(AMPLITUDE_SINE),
            sawtooth_amplitude: SharedFloat::new(AMPLITUDE_SAWTOOTH),
            impulse_amplitude: SharedFloat::new(AMPLITUDE_IMPULSE),
            ping_amplitude: SharedFloat::new(AMPLITUDE_SAW_PING),
            enables: ChannelEnables::new(crate::MAX_OSCILLATORS),
            ping_trigger: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set every generator's amplitude to the same value.
    pub fn set_amplitude(&self, amplitude: f32) {
        self.sine_amplitude.set(amplitude);
        self.sawtooth_amplitude.set(amplitude);
        self.impulse_amplitude.set(amplitude);
        self.ping_amplitude.set(amplitude);
    }

    /// Request one saw-ping burst from the live graph.
    pub fn trigger_ping(&self) {
        self.ping_trigger.store(true, Ordering::Release);
    }
}

impl Default for GraphControls {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete generator → converter → sink pipeline for one output
/// configuration.
#[derive(Debug)]
pub struct FlowGraph {
    converter: Converter,
    sink: Sink,
    channel_count: usize,
}

impl FlowGraph {
    /// Build a graph for the negotiated output configuration. Oscillator
    /// count follows the channel count, capped at
    /// [`MAX_OSCILLATORS`](crate::MAX_OSCILLATORS).
    pub fn build(tone: ToneType, config: &StreamConfig, controls: &GraphControls) -> Self {
        let sample_rate = config.sample_rate;
        let channels = (config.channel_count as usize).clamp(1, crate::MAX_OSCILLATORS);

        let converter = match tone {
            ToneType::Sine => {
                let generators = (0..channels)
                    .map(|i| {
                        Generator::Sine(SineOscillator::new(
                            sample_rate,
                            BASE_FREQUENCY * (i + 1) as f32,
                            controls.sine_amplitude.clone(),
                        ))
                    })
                    .collect();
                Converter::ManyToMulti(ManyToMultiConverter::new(
                    generators,
                    controls.enables.clone(),
                ))
            }
            ToneType::Sawtooth => {
                let generators = (0..channels)
                    .map(|i| {
                        Generator::Sawtooth(SawtoothOscillator::new(
                            sample_rate,
                            BASE_FREQUENCY * (i + 1) as f32,
                            controls.sawtooth_amplitude.clone(),
                        ))
                    })
                    .collect();
                Converter::ManyToMulti(ManyToMultiConverter::new(
                    generators,
                    controls.enables.clone(),
                ))
            }
            ToneType::Impulse => Converter::MonoToMulti(MonoToMultiConverter::new(
                Generator::Impulse(ImpulseOscillator::new(
                    sample_rate,
                    FREQUENCY_IMPULSE,
                    controls.impulse_amplitude.clone(),
                )),
                controls.enables.clone(),
            )),
            ToneType::SawPing => Converter::MonoToMulti(MonoToMultiConverter::new(
                Generator::SawPing(SawPingGenerator::new(
                    sample_rate,
                    FREQUENCY_SAW_PING,
                    SAW_PING_DECAY_SECONDS,
                    controls.ping_amplitude.clone(),
                    Arc::clone(&controls.ping_trigger),
                )),
                controls.enables.clone(),
            )),
        };

        let sink = match config.format {
            SampleFormat::I16 => Sink::I16(SinkI16),
            _ => Sink::Float(SinkFloat),
        };

        Self {
            converter,
            sink,
            channel_count: config.channel_count.max(1) as usize,
        }
    }

    /// Render one interleaved buffer. `out.len()` should be a multiple of
    /// the channel count; a trailing partial frame is rendered short.
    pub fn render(&mut self, out: &mut [f32]) {
        self.sink.render(&mut self.converter, out, self.channel_count);
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }
}
