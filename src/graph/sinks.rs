//! Flow-graph sinks
//!
//! The sink is the last node of the graph: it pulls frames from the
//! converter into the stream's interleaved buffer. Providers deliver f32
//! buffers, so the 16-bit sink quantizes each sample to i16 and back,
//! reproducing the precision of a genuine 16-bit stream.

use super::converters::Converter;

/// Float sink: frames pass through untouched.
#[derive(Debug)]
pub struct SinkFloat;

impl SinkFloat {
    pub fn render(&self, converter: &mut Converter, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels) {
            converter.next_frame(frame);
        }
    }
}

/// 16-bit sink: quantizes through i16 on the way out.
#[derive(Debug)]
pub struct SinkI16;

impl SinkI16 {
    pub fn render(&self, converter: &mut Converter, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels) {
            converter.next_frame(frame);
            for sample in frame.iter_mut() {
                let quantized = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                *sample = quantized as f32 / 32768.0;
            }
        }
    }
}

/// Sink stage of a flow graph.
#[derive(Debug)]
pub enum Sink {
    Float(SinkFloat),
    I16(SinkI16),
}

impl Sink {
    pub fn render(&self, converter: &mut Converter, out: &mut [f32], channels: usize) {
        match self {
            Sink::Float(s) => s.render(converter, out, channels),
            Sink::I16(s) => s.render(converter, out, channels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::converters::{ChannelEnables, ManyToMultiConverter};
    use crate::graph::oscillators::{Generator, SineOscillator};
    use crate::shared::SharedFloat;

    fn converter() -> Converter {
        Converter::ManyToMulti(ManyToMultiConverter::new(
            vec![Generator::Sine(SineOscillator::new(
                48000,
                440.0,
                SharedFloat::new(1.0),
            ))],
            ChannelEnables::new(8),
        ))
    }

    #[test]
    fn test_i16_sink_quantizes() {
        let mut conv = converter();
        let mut out = vec![0.0f32; 256];
        Sink::I16(SinkI16).render(&mut conv, &mut out, 1);

        for &sample in &out {
            let requantized = (sample * 32768.0).round() / 32768.0;
            assert!(
                (sample - requantized).abs() < 1e-6,
                "Sample {} is not on the 16-bit grid",
                sample
            );
        }
    }

    #[test]
    fn test_float_sink_passes_through() {
        let mut conv = converter();
        let mut out = vec![0.0f32; 256];
        Sink::Float(SinkFloat).render(&mut conv, &mut out, 1);
        assert!(out.iter().any(|&s| s != 0.0));
    }
}
