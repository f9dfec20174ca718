//! Stream provider interface
//!
//! The activity layer talks to audio hardware exclusively through
//! [`StreamProvider`], which negotiates a configuration and opens streams
//! that deliver fixed-size buffers through push callbacks. Providers that
//! cannot deliver callbacks instead hand out [`BlockingReader`]/
//! [`BlockingWriter`] endpoints driven by the activity's blocking-I/O thread.
//!
//! Errors from stream operations are result codes, not panics: every open,
//! start, pause and stop returns `Result<_, StreamError>`.

use std::time::Duration;
use thiserror::Error;

use super::spec::{Direction, StreamConfig, StreamSpec};

/// Errors that can occur during stream operations
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("No free stream slot (all {0} in use)")]
    NoFreeSlots(usize),

    #[error("Invalid stream slot index: {0}")]
    InvalidSlot(i32),

    #[error("Full-duplex output opened before its input stream")]
    InputNotOpen,

    #[error("Activity has no open stream")]
    NotOpen,

    #[error("Provider rejected the configuration: {0}")]
    Rejected(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("Stream disconnected")]
    Disconnected,
}

/// Render callback for an output stream: fill the interleaved f32 buffer.
///
/// Invoked on the provider's audio thread. Must not block, allocate, or run
/// unbounded work.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Capture callback for an input stream: consume the interleaved f32 buffer.
///
/// Same real-time contract as [`RenderFn`].
pub type CaptureFn = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Blocking read endpoint for the pull-driven fallback path.
pub trait BlockingReader: Send {
    /// Read up to `buf.len()` interleaved samples, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when no data arrived within the timeout; the caller's
    /// loop re-checks its stop flag between reads, so the timeout bounds the
    /// shutdown latency of the blocking-I/O thread.
    fn read(&mut self, buf: &mut [f32], timeout: Duration) -> Result<usize, StreamError>;
}

/// Blocking write endpoint for the pull-driven fallback path.
pub trait BlockingWriter: Send {
    /// Write the interleaved samples, blocking until the provider accepted
    /// them. Returns the number of samples written.
    fn write(&mut self, buf: &[f32]) -> Result<usize, StreamError>;
}

/// One open stream owned by an activity's stream slot.
///
/// Not `Send`: stream handles stay on the control thread that opened them.
/// The blocking-I/O endpoints taken from a stream are `Send` and may move
/// into the activity's background thread.
pub trait ProviderStream {
    /// The configuration this stream was opened with.
    fn config(&self) -> &StreamConfig;

    fn direction(&self) -> Direction;

    /// Non-blocking start request. Callbacks (or blocking I/O data) begin
    /// flowing some time after this returns.
    fn request_start(&mut self) -> Result<(), StreamError>;

    /// Non-blocking pause request.
    fn request_pause(&mut self) -> Result<(), StreamError>;

    /// Non-blocking stop request. Stopping is a request to cease invoking the
    /// callback; a callback already in flight may still complete.
    fn request_stop(&mut self) -> Result<(), StreamError>;

    /// Take the blocking read endpoint, if this stream supports pull-driven
    /// input. Yields `Some` at most once.
    fn take_reader(&mut self) -> Option<Box<dyn BlockingReader>> {
        None
    }

    /// Take the blocking write endpoint, if this stream supports pull-driven
    /// output. Yields `Some` at most once.
    fn take_writer(&mut self) -> Option<Box<dyn BlockingWriter>> {
        None
    }
}

/// Factory for audio streams.
///
/// `negotiate` resolves a requested [`StreamSpec`] into the configuration the
/// provider can actually deliver (the request is advisory); `open_*` then
/// opens a stream for exactly that configuration. Splitting the two lets the
/// caller build its signal graph or analyzer for the negotiated channel
/// count and sample rate before the stream exists.
pub trait StreamProvider {
    /// Resolve the requested spec into an actual configuration, or reject it.
    fn negotiate(&self, spec: &StreamSpec) -> Result<StreamConfig, StreamError>;

    /// Open an output stream delivering buffers to `render`.
    fn open_output(
        &self,
        config: &StreamConfig,
        render: RenderFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError>;

    /// Open an input stream delivering buffers to `capture`.
    fn open_input(
        &self,
        config: &StreamConfig,
        capture: CaptureFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError>;

    /// Whether this provider delivers push callbacks. When false, activities
    /// run their blocking-I/O loop against the reader/writer endpoints
    /// instead.
    fn supports_callbacks(&self) -> bool {
        true
    }
}
