//! Audioprobe - real-time audio test activities
//!
//! A small framework of audio "test activities" driven by a host control
//! surface: output tone exercises, input peak metering, record/playback,
//! and full-duplex measurements (echo, round-trip latency, glitch
//! detection). Activities coordinate a hard-real-time audio callback with a
//! non-real-time control thread: the callback never allocates or locks, and
//! all cross-thread state is atomics and SPSC rings.
//!
//! Entry point: build an [`ActivitySelector`] against a
//! [`stream::provider::StreamProvider`] (cpal for real devices, the
//! loopback provider for hardware-free self-tests) and drive the current
//! activity's open/start/stop/close lifecycle.

pub mod activity;
pub mod analyzer;
pub mod capability;
pub mod config;
pub mod graph;
pub mod recording;
pub mod shared;
pub mod stream;

pub use activity::selector::ActivitySelector;
pub use activity::{Activity, ActivityType};
pub use capability::{MmapProbe, UnsupportedMmapProbe};
pub use config::ProbeConfig;
pub use graph::ToneType;
pub use stream::cpal::CpalProvider;
pub use stream::loopback::{LoopbackOptions, LoopbackProvider};
pub use stream::provider::{StreamError, StreamProvider};
pub use stream::spec::{StreamConfig, StreamSpec};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sample rate for audio processing
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default callback burst size when the provider does not report one
pub const DEFAULT_FRAMES_PER_BURST: u32 = 192;

/// Maximum oscillators in an output flow graph (one per channel)
pub const MAX_OSCILLATORS: usize = 8;

pub use activity::slots::MAX_STREAMS;
