//! Signal analyzers
//!
//! - Per-channel peak metering for input streams ([`peak`])
//! - Full-duplex processors consuming the synchronized input/output buffer
//!   pair each callback: echo ([`echo`]), round-trip latency ([`latency`])
//!   and glitch detection ([`glitch`])
//!
//! A full-duplex processor runs entirely inside the output callback; its
//! observable state (state machine position, result, reset count) is
//! published through shared atomic snapshots the control thread reads at any
//! time.

pub mod echo;
pub mod glitch;
pub mod latency;
pub mod peak;

/// Per-buffer contract of a full-duplex analyzer.
///
/// `input` holds the most recent captured mono samples; `output` is the mono
/// block about to be written to the output stream. Both are the same length.
/// The implementation must finish within the callback deadline: bounded
/// work, no allocation, no locks.
pub trait DuplexProcessor: Send {
    fn process(&mut self, input: &[f32], output: &mut [f32]);
}
