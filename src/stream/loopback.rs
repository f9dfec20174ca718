//! Software loopback stream provider
//!
//! Routes output audio back to input through a configurable delay line,
//! entirely in memory. Used for hardware-free self-tests of the activity
//! stack: the test (or host) drives the clock explicitly with [`pump`],
//! which delivers one buffer to every started stream, so results are
//! deterministic.
//!
//! Two modes:
//! - callback mode (default): `pump(frames)` invokes the registered render
//!   and capture callbacks synchronously, output first, then input with the
//!   delayed signal.
//! - blocking mode (`callbacks: false`): streams expose reader/writer
//!   endpoints instead, exercising the activities' blocking-I/O fallback.
//!   Reads apply an artificial per-call delay to simulate device pacing.
//!
//! [`pump`]: LoopbackProvider::pump

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::provider::{
    BlockingReader, BlockingWriter, CaptureFn, ProviderStream, RenderFn, StreamError,
    StreamProvider,
};
use super::spec::{Direction, SampleFormat, StreamConfig, StreamSpec};

/// Capacity of the blocking-mode sample channel (~1s of mono at 48kHz)
const BLOCKING_CHANNEL_CAPACITY: usize = 65536;

/// How long a blocking write waits for space before dropping samples
const WRITE_BACKPRESSURE_LIMIT: Duration = Duration::from_millis(100);

/// Options for [`LoopbackProvider`]
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Sample rate every stream is negotiated to
    pub sample_rate: u32,
    /// Loopback delay from output to input, in frames
    pub latency_frames: usize,
    /// Whether the provider delivers push callbacks (false = blocking mode)
    pub callbacks: bool,
    /// Artificial delay applied inside every blocking read
    pub read_delay: Duration,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            latency_frames: 0,
            callbacks: true,
            read_delay: Duration::ZERO,
        }
    }
}

struct OutputPort {
    render: RenderFn,
    channels: usize,
    started: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

struct InputPort {
    capture: CaptureFn,
    channels: usize,
    started: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

/// Shared loopback state. Locked only by `pump` and open/close, never from a
/// real-time context (this provider has none).
struct LoopbackBus {
    delay: VecDeque<f32>,
    outputs: Vec<OutputPort>,
    inputs: Vec<InputPort>,
    mix: Vec<f32>,
    scratch: Vec<f32>,
}

/// In-memory loopback provider for self-tests
pub struct LoopbackProvider {
    opts: LoopbackOptions,
    bus: Arc<Mutex<LoopbackBus>>,
    // Blocking-mode transport: writer end feeds the reader end through the
    // configured latency (pre-seeded zeros).
    blocking_tx: Sender<f32>,
    blocking_rx: Mutex<Option<Receiver<f32>>>,
}

impl LoopbackProvider {
    pub fn new(opts: LoopbackOptions) -> Self {
        let mut delay = VecDeque::with_capacity(opts.latency_frames + 8192);
        delay.extend(std::iter::repeat(0.0f32).take(opts.latency_frames));

        let (blocking_tx, rx) = bounded(BLOCKING_CHANNEL_CAPACITY);
        for _ in 0..opts.latency_frames.min(BLOCKING_CHANNEL_CAPACITY) {
            let _ = blocking_tx.try_send(0.0f32);
        }

        Self {
            opts,
            bus: Arc::new(Mutex::new(LoopbackBus {
                delay,
                outputs: Vec::new(),
                inputs: Vec::new(),
                mix: Vec::new(),
                scratch: Vec::new(),
            })),
            blocking_tx,
            blocking_rx: Mutex::new(Some(rx)),
        }
    }

    /// Advance the loopback clock by `frames`: render every started output,
    /// push the mono mix through the delay line, then deliver the delayed
    /// signal to every started input. Callback mode only.
    pub fn pump(&self, frames: usize) {
        let mut bus = self.bus.lock().expect("loopback bus poisoned");
        let bus = &mut *bus;

        bus.outputs.retain(|p| p.open.load(Ordering::Acquire));
        bus.inputs.retain(|p| p.open.load(Ordering::Acquire));

        bus.mix.clear();
        bus.mix.resize(frames, 0.0);

        for port in bus.outputs.iter_mut() {
            if !port.started.load(Ordering::Acquire) {
                continue;
            }
            bus.scratch.clear();
            bus.scratch.resize(frames * port.channels, 0.0);
            (port.render)(&mut bus.scratch);
            // Mono loopback: channel 0 only
            for (i, frame) in bus.scratch.chunks(port.channels).enumerate() {
                bus.mix[i] += frame[0];
            }
        }

        bus.delay.extend(bus.mix.iter().copied());

        bus.mix.clear();
        for _ in 0..frames {
            bus.mix.push(bus.delay.pop_front().unwrap_or(0.0));
        }

        for port in bus.inputs.iter_mut() {
            if !port.started.load(Ordering::Acquire) {
                continue;
            }
            bus.scratch.clear();
            bus.scratch.resize(frames * port.channels, 0.0);
            for (i, &s) in bus.mix.iter().enumerate() {
                for ch in 0..port.channels {
                    bus.scratch[i * port.channels + ch] = s;
                }
            }
            (port.capture)(&bus.scratch);
        }
    }
}

impl StreamProvider for LoopbackProvider {
    fn negotiate(&self, spec: &StreamSpec) -> Result<StreamConfig, StreamError> {
        // Blocking mode carries mono samples end to end
        let channels = if !self.opts.callbacks {
            1
        } else if spec.channel_count == 0 {
            2
        } else {
            spec.channel_count
        };
        Ok(StreamConfig {
            sample_rate: self.opts.sample_rate,
            channel_count: channels,
            format: if spec.format == SampleFormat::Unspecified {
                SampleFormat::Float
            } else {
                spec.format
            },
            sharing_mode: spec.sharing_mode,
            performance_mode: spec.performance_mode,
            frames_per_burst: if spec.frames_per_burst == 0 {
                crate::DEFAULT_FRAMES_PER_BURST
            } else {
                spec.frames_per_burst
            },
            device_id: spec.device_id,
        })
    }

    fn open_output(
        &self,
        config: &StreamConfig,
        render: RenderFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError> {
        let started = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));

        let mut writer = None;
        if self.opts.callbacks {
            let mut bus = self.bus.lock().expect("loopback bus poisoned");
            bus.outputs.push(OutputPort {
                render,
                channels: config.channel_count as usize,
                started: Arc::clone(&started),
                open: Arc::clone(&open),
            });
        } else {
            writer = Some(Box::new(ChannelWriter {
                tx: self.blocking_tx.clone(),
                channels: config.channel_count as usize,
            }) as Box<dyn BlockingWriter>);
        }

        Ok(Box::new(LoopbackStream {
            config: config.clone(),
            direction: Direction::Output,
            started,
            open,
            reader: None,
            writer,
        }))
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        capture: CaptureFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError> {
        let started = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicBool::new(true));

        let mut reader = None;
        if self.opts.callbacks {
            let mut bus = self.bus.lock().expect("loopback bus poisoned");
            bus.inputs.push(InputPort {
                capture,
                channels: config.channel_count as usize,
                started: Arc::clone(&started),
                open: Arc::clone(&open),
            });
        } else {
            // One blocking reader per provider; a second blocking input
            // would read nothing.
            let rx = self
                .blocking_rx
                .lock()
                .expect("loopback reader poisoned")
                .take()
                .ok_or(StreamError::Rejected(
                    "loopback blocking reader already taken".into(),
                ))?;
            reader = Some(Box::new(ChannelReader {
                rx,
                read_delay: self.opts.read_delay,
            }) as Box<dyn BlockingReader>);
        }

        Ok(Box::new(LoopbackStream {
            config: config.clone(),
            direction: Direction::Input,
            started,
            open,
            reader,
            writer: None,
        }))
    }

    fn supports_callbacks(&self) -> bool {
        self.opts.callbacks
    }
}

struct LoopbackStream {
    config: StreamConfig,
    direction: Direction,
    started: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    reader: Option<Box<dyn BlockingReader>>,
    writer: Option<Box<dyn BlockingWriter>>,
}

impl ProviderStream for LoopbackStream {
    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn request_start(&mut self) -> Result<(), StreamError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn request_pause(&mut self) -> Result<(), StreamError> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn request_stop(&mut self) -> Result<(), StreamError> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn take_reader(&mut self) -> Option<Box<dyn BlockingReader>> {
        self.reader.take()
    }

    fn take_writer(&mut self) -> Option<Box<dyn BlockingWriter>> {
        self.writer.take()
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

struct ChannelReader {
    rx: Receiver<f32>,
    read_delay: Duration,
}

impl BlockingReader for ChannelReader {
    fn read(&mut self, buf: &mut [f32], timeout: Duration) -> Result<usize, StreamError> {
        // Simulated device pacing: the call blocks for at least read_delay
        // even when data is available, like a hardware read that completes
        // on the next buffer boundary.
        std::thread::sleep(self.read_delay);
        if buf.is_empty() {
            return Ok(0);
        }

        let remaining = timeout.saturating_sub(self.read_delay);
        match self.rx.recv_timeout(remaining) {
            Ok(s) => buf[0] = s,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => return Ok(0),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                return Err(StreamError::Disconnected)
            }
        }

        let mut n = 1;
        while n < buf.len() {
            match self.rx.try_recv() {
                Ok(s) => {
                    buf[n] = s;
                    n += 1;
                }
                Err(_) => break,
            }
        }
        Ok(n)
    }
}

struct ChannelWriter {
    tx: Sender<f32>,
    channels: usize,
}

impl BlockingWriter for ChannelWriter {
    fn write(&mut self, buf: &[f32]) -> Result<usize, StreamError> {
        // Mono transport: channel 0 of each frame. Backpressure is bounded;
        // when the reader side stalls past the limit, samples are dropped so
        // the writer loop can observe its stop flag.
        for frame in buf.chunks(self.channels.max(1)) {
            match self.tx.send_timeout(frame[0], WRITE_BACKPRESSURE_LIMIT) {
                Ok(()) => {}
                Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => break,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return Err(StreamError::Disconnected)
                }
            }
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn float_config(channels: u16) -> StreamConfig {
        StreamConfig {
            sample_rate: 48000,
            channel_count: channels,
            format: SampleFormat::Float,
            sharing_mode: crate::stream::spec::SharingMode::Shared,
            performance_mode: crate::stream::spec::PerformanceMode::None,
            frames_per_burst: 192,
            device_id: 0,
        }
    }

    #[test]
    fn test_pump_routes_output_to_input() {
        let provider = LoopbackProvider::new(LoopbackOptions::default());

        let mut out_stream = provider
            .open_output(&float_config(2), Box::new(|buf: &mut [f32]| buf.fill(0.5)))
            .unwrap();

        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let mut in_stream = provider
            .open_input(
                &float_config(1),
                Box::new(move |buf: &[f32]| sink.lock().unwrap().extend_from_slice(buf)),
            )
            .unwrap();

        out_stream.request_start().unwrap();
        in_stream.request_start().unwrap();

        provider.pump(64);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 64);
        assert!(captured.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_latency_frames_delay_the_signal() {
        let provider = LoopbackProvider::new(LoopbackOptions {
            latency_frames: 100,
            ..Default::default()
        });

        let mut out_stream = provider
            .open_output(&float_config(1), Box::new(|buf: &mut [f32]| buf.fill(1.0)))
            .unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let mut in_stream = provider
            .open_input(
                &float_config(1),
                Box::new(move |buf: &[f32]| sink.lock().unwrap().extend_from_slice(buf)),
            )
            .unwrap();

        out_stream.request_start().unwrap();
        in_stream.request_start().unwrap();
        provider.pump(256);

        let captured = captured.lock().unwrap();
        assert!(captured[..100].iter().all(|&s| s == 0.0));
        assert!(captured[100..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_stopped_stream_receives_nothing() {
        let provider = LoopbackProvider::new(LoopbackOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _stream = provider
            .open_output(
                &float_config(2),
                Box::new(move |_buf: &mut [f32]| {
                    counter.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .unwrap();

        // Never started
        provider.pump(64);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_blocking_read_applies_delay() {
        let provider = LoopbackProvider::new(LoopbackOptions {
            callbacks: false,
            read_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Input))
            .unwrap();
        let mut stream = provider.open_input(&config, Box::new(|_: &[f32]| {})).unwrap();
        let mut reader = stream.take_reader().expect("blocking mode has a reader");

        let mut buf = [0.0f32; 32];
        let start = Instant::now();
        let _ = reader.read(&mut buf, Duration::from_millis(60)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_blocking_write_feeds_read() {
        let provider = LoopbackProvider::new(LoopbackOptions {
            callbacks: false,
            ..Default::default()
        });
        let out_config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Output))
            .unwrap();
        let in_config = provider
            .negotiate(&StreamSpec::unspecified(Direction::Input))
            .unwrap();

        let mut out = provider
            .open_output(&out_config, Box::new(|_: &mut [f32]| {}))
            .unwrap();
        let mut inp = provider.open_input(&in_config, Box::new(|_: &[f32]| {})).unwrap();

        let mut writer = out.take_writer().unwrap();
        let mut reader = inp.take_reader().unwrap();

        writer.write(&[0.25f32; 16]).unwrap();
        let mut buf = [0.0f32; 16];
        let n = reader.read(&mut buf, Duration::from_millis(100)).unwrap();
        assert!(n > 0);
        assert!(buf[..n].iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
