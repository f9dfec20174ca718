//! Input test activities
//!
//! [`ActivityTestInput`] meters an input stream's per-channel peak level,
//! optionally teeing the captured audio into an in-memory recording.
//! [`ActivityRecording`] layers simple playback of that recording on top:
//! `start_playback` opens a dedicated output stream reading the capture.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::Producer;
use ringbuf::{HeapCons, HeapProd};

use crate::activity::base::ActivityBase;
use crate::activity::slots::SlotId;
use crate::analyzer::peak::PeakMeter;
use crate::capability::MmapProbe;
use crate::recording::{recording_channel, MultiChannelRecording, PlaybackCursor};
use crate::stream::provider::{BlockingReader, StreamError, StreamProvider};
use crate::stream::spec::{Direction, StreamSpec};

/// Poll timeout of the blocking read loop; bounds the shutdown latency of
/// `stop_blocking_io_thread`
const BLOCKING_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Frames per chunk in the blocking read loop
const BLOCKING_CHUNK_FRAMES: usize = 512;

pub struct ActivityTestInput {
    base: ActivityBase,
    meter: Option<PeakMeter>,
    /// When set before open, captured audio is teed into a recording
    record_armed: bool,
    rec_cons: Option<HeapCons<f32>>,
    /// Producer kept for the blocking loop; in callback mode it moves into
    /// the capture closure instead
    rec_prod: Option<HeapProd<f32>>,
}

impl ActivityTestInput {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            base: ActivityBase::new(provider, mmap_probe),
            meter: None,
            record_armed: false,
            rec_cons: None,
            rec_prod: None,
        }
    }

    pub fn with_recording(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        let mut activity = Self::new(provider, mmap_probe);
        activity.record_armed = true;
        activity
    }

    pub fn base(&self) -> &ActivityBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        &mut self.base
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        if spec.direction != Direction::Input {
            return Err(StreamError::Unsupported(
                "input activity opens input streams only",
            ));
        }
        let provider = self.base.provider();
        let config = provider.negotiate(spec)?;

        let meter = PeakMeter::new(config.channel_count as usize, config.sample_rate);
        self.meter = Some(meter.clone());

        let mut callback_prod: Option<HeapProd<f32>> = None;
        if self.record_armed {
            let (prod, cons) =
                recording_channel(config.sample_rate, config.channel_count as usize);
            self.rec_cons = Some(cons);
            if provider.supports_callbacks() {
                callback_prod = Some(prod);
            } else {
                self.rec_prod = Some(prod);
            }
        }

        let counter = self.base.callback_counter();
        let stream = provider.open_input(
            &config,
            Box::new(move |buf: &[f32]| {
                counter.fetch_add(1, Ordering::Relaxed);
                meter.process(buf);
                if let Some(prod) = callback_prod.as_mut() {
                    let _ = prod.push_slice(buf);
                }
            }),
        )?;

        self.base.install_stream(stream, config, Direction::Input)
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.base.provider().supports_callbacks() {
            self.base.start_all()
        } else {
            self.start_blocking()
        }
    }

    /// Blocking-read fallback: a dedicated thread feeds captured buffers to
    /// the meter and, when a recording is armed, the recording writer.
    fn start_blocking(&mut self) -> Result<(), StreamError> {
        let meter = self.meter.clone().ok_or(StreamError::NotOpen)?;
        let recorder = self.rec_prod.take();

        let entry = self
            .base
            .pool_mut()
            .first_mut(Direction::Input)
            .ok_or(StreamError::NotOpen)?;
        let reader = entry
            .stream
            .take_reader()
            .ok_or(StreamError::Unsupported("stream has no blocking reader"))?;
        let channels = entry.config.channel_count as usize;
        entry.stream.request_start()?;

        let counter = self.base.callback_counter();
        self.base.spawn_blocking_io(move |enabled| {
            run_blocking_input(enabled, reader, meter, recorder, counter, channels)
        })?;
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
        self.base.close_slot(slot)
    }

    pub fn peak_level(&self, channel: i32) -> f64 {
        if channel < 0 {
            return 0.0;
        }
        self.meter
            .as_ref()
            .map(|m| m.level(channel as usize) as f64)
            .unwrap_or(0.0)
    }

    pub fn recording_consumer(&mut self) -> Option<&mut HeapCons<f32>> {
        self.rec_cons.as_mut()
    }
}

fn run_blocking_input(
    enabled: Arc<std::sync::atomic::AtomicBool>,
    mut reader: Box<dyn BlockingReader>,
    meter: PeakMeter,
    mut recorder: Option<HeapProd<f32>>,
    counter: Arc<std::sync::atomic::AtomicU64>,
    channels: usize,
) {
    let mut chunk = vec![0.0f32; BLOCKING_CHUNK_FRAMES * channels];
    // The enabled flag is observed between reads; each read is bounded by
    // BLOCKING_READ_TIMEOUT, so stop latency is at most one timeout plus one
    // processing pass.
    while enabled.load(Ordering::Acquire) {
        match reader.read(&mut chunk, BLOCKING_READ_TIMEOUT) {
            Ok(0) => {}
            Ok(n) => {
                counter.fetch_add(1, Ordering::Relaxed);
                meter.process(&chunk[..n]);
                if let Some(prod) = recorder.as_mut() {
                    let _ = prod.push_slice(&chunk[..n]);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Blocking read failed, exiting loop");
                break;
            }
        }
    }
}

/// Record a configured input stream and play it back.
pub struct ActivityRecording {
    input: ActivityTestInput,
    recording: Option<Arc<MultiChannelRecording>>,
    playback_slot: Option<SlotId>,
}

impl ActivityRecording {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            input: ActivityTestInput::with_recording(provider, mmap_probe),
            recording: None,
            playback_slot: None,
        }
    }

    pub fn base(&self) -> &ActivityBase {
        self.input.base()
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        self.input.base_mut()
    }

    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        self.input.open(spec)
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        self.input.start()
    }

    pub fn pause(&mut self) -> Result<(), StreamError> {
        self.input.pause()
    }

    pub fn peak_level(&self, channel: i32) -> f64 {
        self.input.peak_level(channel)
    }

    /// Assemble the capture into a recording and open a playback stream over
    /// it. The playback stream occupies its own slot.
    pub fn start_playback(&mut self) -> Result<(), StreamError> {
        if self.playback_slot.is_some() {
            return Ok(());
        }
        let input_config = {
            let entry = self
                .input
                .base_mut()
                .pool_mut()
                .first_mut(Direction::Input)
                .ok_or(StreamError::NotOpen)?;
            entry.config.clone()
        };
        let consumer = self
            .input
            .recording_consumer()
            .ok_or(StreamError::NotOpen)?;
        let recording = Arc::new(MultiChannelRecording::drain(
            consumer,
            input_config.sample_rate,
            input_config.channel_count as usize,
        ));
        self.recording = Some(Arc::clone(&recording));

        let provider = self.input.base().provider();
        let spec = StreamSpec {
            sample_rate: input_config.sample_rate,
            channel_count: input_config.channel_count,
            ..StreamSpec::unspecified(Direction::Output)
        };
        let config = provider.negotiate(&spec)?;

        let mut cursor = PlaybackCursor::new(recording);
        let channels = config.channel_count as usize;
        let counter = self.input.base().callback_counter();
        let stream = provider.open_output(
            &config,
            Box::new(move |buf: &mut [f32]| {
                counter.fetch_add(1, Ordering::Relaxed);
                cursor.render(buf, channels);
            }),
        )?;

        let slot = self
            .input
            .base_mut()
            .install_stream(stream, config, Direction::Output)?;
        self.input
            .base_mut()
            .pool_mut()
            .get_mut(slot.as_raw())?
            .stream
            .request_start()?;
        self.playback_slot = Some(slot);
        Ok(())
    }

    /// Stop and release the playback stream, if any.
    pub fn stop_playback(&mut self) -> Result<(), StreamError> {
        match self.playback_slot.take() {
            Some(slot) => self.input.base_mut().release_stream(slot.as_raw()),
            None => Ok(()),
        }
    }

    /// Stop playback first, then the audio streams. Both steps always run;
    /// the first non-OK result is reported.
    pub fn stop(&mut self) -> Result<(), StreamError> {
        let playback_result = self.stop_playback();
        let audio_result = self.input.stop();
        match playback_result {
            Err(e) => Err(e),
            Ok(()) => audio_result,
        }
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        if self.playback_slot.map(|s| s.as_raw()) == Some(slot) {
            self.playback_slot = None;
        }
        self.input.close(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::UnsupportedMmapProbe;
    use crate::stream::loopback::{LoopbackOptions, LoopbackProvider};
    use std::time::Instant;

    #[test]
    fn test_peak_level_follows_loopback_signal() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions::default()));
        let mut activity =
            ActivityTestInput::new(provider.clone(), Arc::new(UnsupportedMmapProbe));

        // A reference tone on the loopback output
        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Output))
            .unwrap();
        let mut tone = provider
            .open_output(&config, Box::new(|buf: &mut [f32]| buf.fill(0.7)))
            .unwrap();
        tone.request_start().unwrap();

        activity.open(&StreamSpec::unspecified(Direction::Input)).unwrap();
        activity.start().unwrap();

        for _ in 0..10 {
            provider.pump(256);
        }

        assert!((activity.peak_level(0) - 0.7).abs() < 0.05);
        assert_eq!(activity.peak_level(-1), 0.0);
    }

    #[test]
    fn test_blocking_io_stop_waits_for_delayed_read() {
        let read_delay = Duration::from_millis(80);
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions {
            callbacks: false,
            read_delay,
            ..Default::default()
        }));
        let mut activity =
            ActivityTestInput::new(provider, Arc::new(UnsupportedMmapProbe));

        activity.open(&StreamSpec::unspecified(Direction::Input)).unwrap();
        activity.start().unwrap();
        assert!(activity.base().blocking_io_running());

        // The loop is inside a delayed read; stop must wait it out
        std::thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        activity.base_mut().stop_blocking_io_thread();
        let elapsed = start.elapsed();

        assert!(!activity.base().blocking_io_running());
        assert!(
            elapsed >= Duration::from_millis(30),
            "Join should wait for the in-flight read, waited {:?}",
            elapsed
        );
    }

    #[test]
    fn test_record_and_play_back() {
        let provider = Arc::new(LoopbackProvider::new(LoopbackOptions::default()));
        let mut activity =
            ActivityRecording::new(provider.clone(), Arc::new(UnsupportedMmapProbe));

        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Output))
            .unwrap();
        let mut tone = provider
            .open_output(&config, Box::new(|buf: &mut [f32]| buf.fill(0.3)))
            .unwrap();
        tone.request_start().unwrap();

        activity.open(&StreamSpec::unspecified(Direction::Input)).unwrap();
        activity.start().unwrap();
        for _ in 0..10 {
            provider.pump(256);
        }
        activity.stop().unwrap();

        activity.start_playback().unwrap();
        assert!(activity.recording.as_ref().unwrap().frame_count() > 0);
        activity.stop_playback().unwrap();
    }
}
