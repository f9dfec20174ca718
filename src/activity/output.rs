//! Output test activities
//!
//! [`ActivityTestOutput`] renders a selectable tone through a flow graph
//! into one output stream. [`ActivityTapToTone`] is the same pipeline fixed
//! to the saw-ping generator, fired on demand to measure output latency
//! against an external reference.
//!
//! The live graph is owned by the render callback. `configure_for_start`
//! builds a fresh graph for the negotiated configuration and hot-swaps it
//! through a bounded channel; the displaced graph is shipped back on a
//! return channel and dropped on the control thread, so the callback never
//! frees memory.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::activity::base::ActivityBase;
use crate::activity::slots::SlotId;
use crate::capability::MmapProbe;
use crate::graph::{FlowGraph, GraphControls, ToneType};
use crate::stream::provider::{BlockingWriter, StreamError, StreamProvider};
use crate::stream::spec::{Direction, StreamSpec};

/// Frames per chunk in the blocking-write fallback loop
const BLOCKING_CHUNK_FRAMES: usize = 512;

pub struct ActivityTestOutput {
    base: ActivityBase,
    controls: GraphControls,
    tone_type: ToneType,
    graph_tx: Option<Sender<FlowGraph>>,
    graph_return_rx: Option<Receiver<FlowGraph>>,
}

impl ActivityTestOutput {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            base: ActivityBase::new(provider, mmap_probe),
            controls: GraphControls::new(),
            tone_type: ToneType::Sine,
            graph_tx: None,
            graph_return_rx: None,
        }
    }

    pub fn base(&self) -> &ActivityBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        &mut self.base
    }

    pub fn controls(&self) -> &GraphControls {
        &self.controls
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        if spec.direction != Direction::Output {
            return Err(StreamError::Unsupported(
                "output activity opens output streams only",
            ));
        }
        let provider = self.base.provider();
        let config = provider.negotiate(spec)?;

        let (graph_tx, graph_rx) = bounded::<FlowGraph>(2);
        let (return_tx, return_rx) = bounded::<FlowGraph>(4);
        let counter = self.base.callback_counter();
        let mut current: Option<FlowGraph> = None;

        let stream = provider.open_output(
            &config,
            Box::new(move |buf: &mut [f32]| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(fresh) = graph_rx.try_recv() {
                    if let Some(old) = current.replace(fresh) {
                        // Ship the displaced graph back for deallocation on
                        // the control thread
                        let _ = return_tx.try_send(old);
                    }
                }
                match current.as_mut() {
                    Some(graph) => graph.render(buf),
                    None => buf.fill(0.0),
                }
            }),
        )?;

        self.graph_tx = Some(graph_tx);
        self.graph_return_rx = Some(return_rx);
        self.base.install_stream(stream, config, Direction::Output)
    }

    /// Build a fresh graph for the current tone and negotiated configuration
    /// and hand it to the live callback.
    pub fn configure_for_start(&mut self) -> Result<(), StreamError> {
        let entry = self
            .base
            .pool_mut()
            .first_mut(Direction::Output)
            .ok_or(StreamError::NotOpen)?;
        let graph = FlowGraph::build(self.tone_type, &entry.config, &self.controls);

        if let Some(rx) = &self.graph_return_rx {
            while rx.try_recv().is_ok() {}
        }
        if let Some(tx) = &self.graph_tx {
            let _ = tx.try_send(graph);
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.base.provider().supports_callbacks() {
            self.configure_for_start()?;
            self.base.start_all()
        } else {
            self.start_blocking()
        }
    }

    /// Blocking-write fallback: the graph is rendered on a dedicated thread
    /// that loops on the stream's write endpoint until disabled.
    fn start_blocking(&mut self) -> Result<(), StreamError> {
        let entry = self
            .base
            .pool_mut()
            .first_mut(Direction::Output)
            .ok_or(StreamError::NotOpen)?;
        let writer = entry
            .stream
            .take_writer()
            .ok_or(StreamError::Unsupported("stream has no blocking writer"))?;
        entry.stream.request_start()?;

        let graph = FlowGraph::build(self.tone_type, &entry.config, &self.controls);
        self.base
            .spawn_blocking_io(move |enabled| run_blocking_output(enabled, writer, graph))?;
        self.base.note_started();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), StreamError> {
        self.base.pause_all()
    }

    pub fn stop(&mut self) -> Result<(), StreamError> {
        self.base.stop_all()
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        self.graph_tx = None;
        self.graph_return_rx = None;
        self.base.close_slot(slot)
    }

    /// Fan the amplitude out to every generator, including generators on
    /// disabled channels.
    pub fn set_amplitude(&mut self, amplitude: f64) {
        tracing::debug!(amplitude, "set_amplitude");
        self.controls.set_amplitude(amplitude as f32);
    }

    /// Mute or unmute one channel without rebuilding the graph.
    pub fn set_channel_enabled(&mut self, channel: i32, enabled: bool) {
        if channel >= 0 {
            self.controls.enables.set(channel as usize, enabled);
        }
    }

    pub fn set_tone_type(&mut self, tone: ToneType) {
        self.tone_type = tone;
    }

    pub fn tone_type(&self) -> ToneType {
        self.tone_type
    }

    /// When the saw-ping tone is selected, enabling fires one burst.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && self.tone_type == ToneType::SawPing {
            self.controls.trigger_ping();
        }
    }
}

fn run_blocking_output(
    enabled: Arc<std::sync::atomic::AtomicBool>,
    mut writer: Box<dyn BlockingWriter>,
    mut graph: FlowGraph,
) {
    let channels = graph.channel_count();
    let mut chunk = vec![0.0f32; BLOCKING_CHUNK_FRAMES * channels];
    while enabled.load(Ordering::Acquire) {
        graph.render(&mut chunk);
        if writer.write(&chunk).is_err() {
            break;
        }
    }
}

/// Tap-to-tone: the output pipeline fixed to the saw-ping generator.
/// `set_enabled(true)` fires a single sharp 800 Hz burst without touching
/// the other generators.
pub struct ActivityTapToTone {
    inner: ActivityTestOutput,
}

impl ActivityTapToTone {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        let mut inner = ActivityTestOutput::new(provider, mmap_probe);
        inner.set_tone_type(ToneType::SawPing);
        Self { inner }
    }

    pub fn base(&self) -> &ActivityBase {
        self.inner.base()
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        self.inner.base_mut()
    }

    pub fn controls(&self) -> &GraphControls {
        self.inner.controls()
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        self.inner.open(spec)
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        self.inner.start()
    }

    pub fn pause(&mut self) -> Result<(), StreamError> {
        self.inner.pause()
    }

    pub fn stop(&mut self) -> Result<(), StreamError> {
        self.inner.stop()
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        self.inner.close(slot)
    }

    /// Reaches the ping generator as well as the rest of the graph.
    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.inner.set_amplitude(amplitude);
    }

    pub fn set_channel_enabled(&mut self, channel: i32, enabled: bool) {
        self.inner.set_channel_enabled(channel, enabled);
    }

    /// Fire one tone burst.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.inner.controls.trigger_ping();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::UnsupportedMmapProbe;
    use crate::stream::loopback::{LoopbackOptions, LoopbackProvider};

    fn output_activity(provider: Arc<LoopbackProvider>) -> ActivityTestOutput {
        ActivityTestOutput::new(provider, Arc::new(UnsupportedMmapProbe))
    }

    #[test]
    fn test_open_rejects_input_spec() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions::default()));
        let mut activity = output_activity(provider);
        let err = activity
            .open(&StreamSpec::unspecified(Direction::Input))
            .unwrap_err();
        assert!(matches!(err, StreamError::Unsupported(_)));
    }

    #[test]
    fn test_rendered_output_reaches_loopback() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions::default()));
        let mut activity = output_activity(Arc::clone(&provider));

        activity.open(&StreamSpec::unspecified(Direction::Output)).unwrap();
        activity.start().unwrap();

        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Input))
            .unwrap();
        let mut tap = provider
            .open_input(
                &config,
                Box::new(move |buf: &[f32]| sink.lock().unwrap().extend_from_slice(buf)),
            )
            .unwrap();
        tap.request_start().unwrap();

        for _ in 0..10 {
            provider.pump(256);
        }

        let captured = captured.lock().unwrap();
        assert!(
            captured.iter().any(|&s| s.abs() > 0.1),
            "Tone should arrive at the loopback input"
        );
        assert!(activity.base().callback_count() >= 10);
    }

    #[test]
    fn test_amplitude_zero_silences_output_and_keeps_enables() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions::default()));
        let mut activity = output_activity(Arc::clone(&provider));

        activity.open(&StreamSpec::unspecified(Direction::Output)).unwrap();
        activity.set_channel_enabled(1, false);
        activity.set_amplitude(0.0);
        activity.start().unwrap();

        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Input))
            .unwrap();
        let mut tap = provider
            .open_input(
                &config,
                Box::new(move |buf: &[f32]| sink.lock().unwrap().extend_from_slice(buf)),
            )
            .unwrap();
        tap.request_start().unwrap();

        for _ in 0..20 {
            provider.pump(256);
        }

        assert!(captured.lock().unwrap().iter().all(|&s| s == 0.0));
        assert!(!activity.controls().enables.is_enabled(1));
        assert!(activity.controls().enables.is_enabled(0));
    }

    #[test]
    fn test_blocking_fallback_runs_and_stops() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions {
            callbacks: false,
            ..Default::default()
        }));
        let mut activity = output_activity(provider);

        activity.open(&StreamSpec::unspecified(Direction::Output)).unwrap();
        activity.start().unwrap();
        assert!(activity.base().blocking_io_running());

        activity.stop().unwrap();
        assert!(!activity.base().blocking_io_running());
    }

    #[test]
    fn test_tap_to_tone_uses_saw_ping() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions::default()));
        let tap = ActivityTapToTone::new(provider, Arc::new(UnsupportedMmapProbe));
        assert_eq!(tap.inner.tone_type(), ToneType::SawPing);
    }
}
