//! Full-duplex test activities
//!
//! Common plumbing for the echo, round-trip latency, and glitch tests: the
//! input callback pushes mono (channel 0) samples into an SPSC ring; the
//! output callback drains the ring into a pre-allocated block and runs the
//! analyzer's `process` on the synchronized input/output pair. The analyzer
//! is owned by the output callback; its observable state is read through
//! shared atomic snapshots.
//!
//! Wiring is deferred: the input side must open first (its negotiated
//! configuration parameterizes the analyzer), and opening the output side
//! completes the pair. Start order is inputs before outputs so the first
//! output buffer has input to consume.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};

use crate::activity::base::ActivityBase;
use crate::activity::slots::SlotId;
use crate::analyzer::echo::EchoProcessor;
use crate::analyzer::glitch::{GlitchAnalyzer, GlitchShared, GlitchState};
use crate::analyzer::latency::{LatencyReport, LatencyState, RoundTripAnalyzer, RoundTripShared};
use crate::analyzer::DuplexProcessor;
use crate::capability::MmapProbe;
use crate::shared::SharedFloat;
use crate::stream::provider::{StreamError, StreamProvider};
use crate::stream::spec::{Direction, PerformanceMode, StreamConfig, StreamSpec};

/// Capacity of the input-to-output ring, in frames (~1s at 48kHz)
const DUPLEX_RING_FRAMES: usize = 65536;

/// Largest block processed per chunk inside the output callback; larger
/// callbacks are handled in multiple chunks, still allocation-free
const DUPLEX_CHUNK_FRAMES: usize = 4096;

/// Default delay of the echo test in seconds
pub const DEFAULT_ECHO_DELAY_SECONDS: f64 = 0.5;

/// Shared plumbing embedded in every full-duplex variant.
pub struct DuplexCommon {
    base: ActivityBase,
    pending: Option<PendingInput>,
}

struct PendingInput {
    consumer: HeapCons<f32>,
    config: StreamConfig,
}

impl DuplexCommon {
    fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            base: ActivityBase::new(provider, mmap_probe),
            pending: None,
        }
    }

    pub fn base(&self) -> &ActivityBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        &mut self.base
    }

    /// Force full-duplex-compatible parameters: low-latency performance mode
    /// on both sides, and the output locked to the input's negotiated sample
    /// rate.
    fn adjust_spec(&self, spec: &StreamSpec) -> StreamSpec {
        let mut adjusted = spec.clone();
        adjusted.performance_mode = PerformanceMode::LowLatency;
        if let Some(pending) = &self.pending {
            adjusted.sample_rate = pending.config.sample_rate;
        }
        adjusted
    }

    fn open_input(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        let provider = self.base.provider();
        let config = provider.negotiate(&self.adjust_spec(spec))?;

        let ring = HeapRb::<f32>::new(DUPLEX_RING_FRAMES);
        let (mut producer, consumer) = ring.split();

        let channels = config.channel_count as usize;
        let counter = self.base.callback_counter();
        let stream = provider.open_input(
            &config,
            Box::new(move |buf: &[f32]| {
                counter.fetch_add(1, Ordering::Relaxed);
                // Mono analysis path: channel 0 only
                for frame in buf.chunks(channels.max(1)) {
                    let _ = producer.try_push(frame[0]);
                }
            }),
        )?;

        self.pending = Some(PendingInput {
            consumer,
            config: config.clone(),
        });
        self.base.install_stream(stream, config, Direction::Input)
    }

    fn open_output<F>(&mut self, spec: &StreamSpec, make: F) -> Result<SlotId, StreamError>
    where
        F: FnOnce(&StreamConfig, &StreamConfig) -> Box<dyn DuplexProcessor>,
    {
        let adjusted = self.adjust_spec(spec);
        let pending = self.pending.take().ok_or(StreamError::InputNotOpen)?;

        let provider = self.base.provider();
        let config = match provider.negotiate(&adjusted) {
            Ok(config) => config,
            Err(e) => {
                self.pending = Some(pending);
                return Err(e);
            }
        };

        let mut processor = make(&pending.config, &config);
        let mut consumer = pending.consumer;
        let channels = config.channel_count as usize;
        let counter = self.base.callback_counter();

        let mut input_block = vec![0.0f32; DUPLEX_CHUNK_FRAMES];
        let mut output_block = vec![0.0f32; DUPLEX_CHUNK_FRAMES];

        let stream = provider.open_output(
            &config,
            Box::new(move |buf: &mut [f32]| {
                counter.fetch_add(1, Ordering::Relaxed);
                let channels = channels.max(1);
                for chunk in buf.chunks_mut(DUPLEX_CHUNK_FRAMES * channels) {
                    let frames = chunk.len() / channels;
                    let got = consumer.pop_slice(&mut input_block[..frames]);
                    input_block[got..frames].fill(0.0);

                    processor.process(&input_block[..frames], &mut output_block[..frames]);

                    for (i, frame) in chunk.chunks_mut(channels).enumerate() {
                        frame.fill(output_block[i]);
                    }
                }
            }),
        )?;

        self.base.install_stream(stream, config, Direction::Output)
    }

    fn open(
        &mut self,
        spec: &StreamSpec,
        make: impl FnOnce(&StreamConfig, &StreamConfig) -> Box<dyn DuplexProcessor>,
    ) -> Result<SlotId, StreamError> {
        match spec.direction {
            Direction::Input => self.open_input(spec),
            Direction::Output => self.open_output(spec, make),
        }
    }

    fn start(&mut self) -> Result<(), StreamError> {
        if !self.base.provider().supports_callbacks() {
            return Err(StreamError::Unsupported(
                "full-duplex tests require a callback-capable provider",
            ));
        }
        // Input before output: the documented duplex start policy
        self.base.start_inputs_then_outputs()
    }

    fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        // Dropping the input while its consumer is parked in pending would
        // leave a dangling half-pair; clear it
        if matches!(self.base.pool().get(slot), Ok(e) if e.direction == Direction::Input) {
            self.pending = None;
        }
        self.base.close_slot(slot)
    }
}

/// Echo input to output through an adjustable delay line.
pub struct ActivityEcho {
    duplex: DuplexCommon,
    delay_seconds: SharedFloat,
}

impl ActivityEcho {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            duplex: DuplexCommon::new(provider, mmap_probe),
            delay_seconds: SharedFloat::new(DEFAULT_ECHO_DELAY_SECONDS as f32),
        }
    }

    pub fn base(&self) -> &ActivityBase {
        self.duplex.base()
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        self.duplex.base_mut()
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        let delay = self.delay_seconds.clone();
        self.duplex.open(spec, move |input_config, _output_config| {
            Box::new(EchoProcessor::new(input_config.sample_rate, delay))
        })
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        self.duplex.start()
    }

    pub fn stop(&mut self) -> Result<(), StreamError> {
        self.duplex.base_mut().stop_all()
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        self.duplex.close(slot)
    }

    /// Takes effect on the next callback, with a cross-fade instead of a
    /// click. Safe to call before open; the value seeds the next pair.
    pub fn set_delay_time(&mut self, seconds: f64) {
        self.delay_seconds.set(seconds as f32);
    }

    pub fn delay_time(&self) -> f64 {
        self.delay_seconds.get() as f64
    }
}

/// Measure round-trip latency with a correlated probe.
pub struct ActivityRoundTripLatency {
    duplex: DuplexCommon,
    shared: Arc<RoundTripShared>,
}

impl ActivityRoundTripLatency {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            duplex: DuplexCommon::new(provider, mmap_probe),
            shared: Arc::new(RoundTripShared::new()),
        }
    }

    pub fn base(&self) -> &ActivityBase {
        self.duplex.base()
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        self.duplex.base_mut()
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        if spec.direction == Direction::Output {
            // Fresh snapshot per test pair
            let shared = Arc::new(RoundTripShared::new());
            let analyzer_shared = Arc::clone(&shared);
            let slot = self.duplex.open(spec, move |input_config, _output_config| {
                Box::new(RoundTripAnalyzer::new(
                    input_config.sample_rate,
                    analyzer_shared,
                ))
            })?;
            self.shared = shared;
            Ok(slot)
        } else {
            self.duplex.open(spec, |_, _| unreachable!())
        }
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        self.duplex.start()
    }

    pub fn stop(&mut self) -> Result<(), StreamError> {
        self.duplex.base_mut().stop_all()
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        self.duplex.close(slot)
    }

    pub fn state(&self) -> LatencyState {
        self.shared.state()
    }

    pub fn result_frames(&self) -> i32 {
        self.shared.result_frames()
    }

    pub fn is_analyzer_done(&self) -> bool {
        self.shared.state().is_done()
    }

    pub fn reset_count(&self) -> u32 {
        self.shared.reset_count()
    }

    /// Serializable report once the analyzer is Done.
    pub fn latency_report(&self) -> Option<LatencyReport> {
        if self.shared.state() != LatencyState::Done {
            return None;
        }
        let frames = self.shared.result_frames();
        let sample_rate = self.duplex.base().sample_rate().max(1);
        Some(LatencyReport {
            latency_frames: frames,
            latency_ms: frames as f64 / sample_rate as f64 * 1000.0,
            confidence: self.shared.confidence(),
            completed_at: chrono::Local::now(),
        })
    }
}

/// Detect glitches against an expected reference waveform.
pub struct ActivityGlitches {
    duplex: DuplexCommon,
    shared: Arc<GlitchShared>,
}

impl ActivityGlitches {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            duplex: DuplexCommon::new(provider, mmap_probe),
            shared: Arc::new(GlitchShared::new()),
        }
    }

    pub fn base(&self) -> &ActivityBase {
        self.duplex.base()
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        self.duplex.base_mut()
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        if spec.direction == Direction::Output {
            let shared = Arc::new(GlitchShared::new());
            let analyzer_shared = Arc::clone(&shared);
            let slot = self.duplex.open(spec, move |input_config, _output_config| {
                Box::new(GlitchAnalyzer::new(
                    input_config.sample_rate,
                    analyzer_shared,
                ))
            })?;
            self.shared = shared;
            Ok(slot)
        } else {
            self.duplex.open(spec, |_, _| unreachable!())
        }
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        self.duplex.start()
    }

    /// Stopping ends the measurement: the analyzer state becomes Done.
    pub fn stop(&mut self) -> Result<(), StreamError> {
        let result = self.duplex.base_mut().stop_all();
        self.shared.finish();
        result
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        self.duplex.close(slot)
    }

    pub fn state(&self) -> GlitchState {
        self.shared.state()
    }

    pub fn glitch_count(&self) -> u32 {
        self.shared.glitch_count()
    }

    pub fn is_analyzer_done(&self) -> bool {
        self.shared.state() == GlitchState::Done
    }

    pub fn reset_count(&self) -> u32 {
        self.shared.reset_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::UnsupportedMmapProbe;
    use crate::stream::loopback::{LoopbackOptions, LoopbackProvider};

    fn duplex_provider(latency_frames: usize) -> Arc<LoopbackProvider> {
        Arc::new(LoopbackProvider::new(LoopbackOptions {
            latency_frames,
            ..Default::default()
        }))
    }

    fn open_pair<F>(activity_open: &mut F) -> Result<(), StreamError>
    where
        F: FnMut(&StreamSpec) -> Result<SlotId, StreamError>,
    {
        activity_open(&StreamSpec::unspecified(Direction::Input))?;
        activity_open(&StreamSpec::unspecified(Direction::Output))?;
        Ok(())
    }

    #[test]
    fn test_output_before_input_is_rejected() {
        let provider = duplex_provider(0);
        let mut echo = ActivityEcho::new(provider, Arc::new(UnsupportedMmapProbe));
        let err = echo
            .open(&StreamSpec::unspecified(Direction::Output))
            .unwrap_err();
        assert!(matches!(err, StreamError::InputNotOpen));
    }

    #[test]
    fn test_echo_pair_runs() {
        let provider = duplex_provider(64);
        let mut echo =
            ActivityEcho::new(provider.clone(), Arc::new(UnsupportedMmapProbe));
        echo.set_delay_time(0.01);

        open_pair(&mut |spec| echo.open(spec)).unwrap();
        echo.start().unwrap();

        for _ in 0..20 {
            provider.pump(256);
        }
        assert!(echo.base().callback_count() > 0);
        echo.stop().unwrap();
    }

    #[test]
    fn test_round_trip_latency_measures_loopback_delay() {
        let delay = 480;
        let provider = duplex_provider(delay);
        let mut rtl =
            ActivityRoundTripLatency::new(provider.clone(), Arc::new(UnsupportedMmapProbe));

        open_pair(&mut |spec| rtl.open(spec)).unwrap();
        rtl.start().unwrap();

        // Priming plus a few probe cycles, with headroom
        for _ in 0..800 {
            provider.pump(256);
            if rtl.is_analyzer_done() {
                break;
            }
        }

        assert_eq!(rtl.state(), LatencyState::Done);
        let measured = rtl.result_frames() as i64;
        assert!(
            (measured - delay as i64).abs() <= 256 + 1,
            "Expected ~{} frames, measured {}",
            delay,
            measured
        );

        let report = rtl.latency_report().unwrap();
        assert_eq!(report.latency_frames, rtl.result_frames());
        assert!(report.confidence > 0.5);
    }

    #[test]
    fn test_glitch_free_loopback_counts_zero() {
        let provider = duplex_provider(32);
        let mut glitches =
            ActivityGlitches::new(provider.clone(), Arc::new(UnsupportedMmapProbe));

        open_pair(&mut |spec| glitches.open(spec)).unwrap();
        glitches.start().unwrap();

        // Two seconds of clean loopback
        for _ in 0..375 {
            provider.pump(256);
        }
        assert_eq!(glitches.state(), GlitchState::Measuring);
        assert_eq!(glitches.glitch_count(), 0);

        glitches.stop().unwrap();
        assert_eq!(glitches.state(), GlitchState::Done);
        assert!(glitches.is_analyzer_done());
    }

    #[test]
    fn test_reopen_requires_close() {
        let provider = duplex_provider(0);
        let mut echo =
            ActivityEcho::new(provider.clone(), Arc::new(UnsupportedMmapProbe));

        open_pair(&mut |spec| echo.open(spec)).unwrap();
        echo.start().unwrap();
        echo.stop().unwrap();

        echo.close(0).unwrap();
        echo.close(1).unwrap();
        assert!(echo.base().pool().is_empty());

        // A fresh pair opens cleanly after close
        open_pair(&mut |spec| echo.open(spec)).unwrap();
        echo.start().unwrap();
        echo.stop().unwrap();
    }
}
