//! Stream configuration types
//!
//! [`StreamSpec`] is what the host requests; [`StreamConfig`] is what the
//! provider actually negotiated. The numeric values of the enums are a stable
//! contract shared with the host UI and must not be renumbered.

use serde::{Deserialize, Serialize};

/// Requested provider backend. Advisory; the provider may substitute.
///
/// Stable host contract values: 0 = unspecified, 1 = compatibility backend,
/// 2 = native low-latency backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiBackend {
    Unspecified,
    Compat,
    Native,
}

impl ApiBackend {
    /// Map a raw host value; unknown values fall back to `Unspecified`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Compat,
            2 => Self::Native,
            _ => Self::Unspecified,
        }
    }
}

/// Device access exclusivity. Stable host contract values: 0 = exclusive,
/// 1 = shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SharingMode {
    Exclusive,
    Shared,
}

impl SharingMode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Exclusive,
            _ => Self::Shared,
        }
    }
}

/// Latency/power trade-off requested from the provider.
///
/// Stable host contract values: 10 = none, 11 = power saving,
/// 12 = low latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceMode {
    None,
    PowerSaving,
    LowLatency,
}

impl PerformanceMode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            11 => Self::PowerSaving,
            12 => Self::LowLatency,
            _ => Self::None,
        }
    }
}

/// Sample format of the stream buffers.
///
/// Stable host contract values: 0 = unspecified, 1 = 16-bit integer,
/// 2 = float. Providers that only deliver float buffers still honor `I16`
/// through the flow-graph sink, which reproduces 16-bit quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Unspecified,
    I16,
    Float,
}

impl SampleFormat {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::I16,
            2 => Self::Float,
            _ => Self::Unspecified,
        }
    }
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// Host-requested stream configuration. Every field is advisory: the provider
/// may return a different actual configuration in [`StreamConfig`].
///
/// Zero means "unspecified" for `sample_rate`, `channel_count`,
/// `frames_per_burst` and `device_id`; -1 means "none" for `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSpec {
    pub api: ApiBackend,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
    pub device_id: i32,
    pub session_id: i32,
    pub frames_per_burst: u32,
    pub direction: Direction,
}

impl StreamSpec {
    /// Build a spec from the raw integer parameters the host passes to
    /// `open`. Unknown enum values fall back to their unspecified variants;
    /// negative sizes are treated as unspecified.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        api: i32,
        sample_rate: i32,
        channel_count: i32,
        format: i32,
        sharing_mode: i32,
        performance_mode: i32,
        device_id: i32,
        session_id: i32,
        frames_per_burst: i32,
        is_input: bool,
    ) -> Self {
        Self {
            api: ApiBackend::from_raw(api),
            sample_rate: sample_rate.max(0) as u32,
            channel_count: channel_count.clamp(0, u16::MAX as i32) as u16,
            format: SampleFormat::from_raw(format),
            sharing_mode: SharingMode::from_raw(sharing_mode),
            performance_mode: PerformanceMode::from_raw(performance_mode),
            device_id,
            session_id,
            frames_per_burst: frames_per_burst.max(0) as u32,
            direction: if is_input {
                Direction::Input
            } else {
                Direction::Output
            },
        }
    }

    /// A fully-unspecified spec for the given direction; the provider picks
    /// every parameter.
    pub fn unspecified(direction: Direction) -> Self {
        Self {
            api: ApiBackend::Unspecified,
            sample_rate: 0,
            channel_count: 0,
            format: SampleFormat::Unspecified,
            sharing_mode: SharingMode::Shared,
            performance_mode: PerformanceMode::None,
            device_id: 0,
            session_id: -1,
            frames_per_burst: 0,
            direction,
        }
    }
}

/// Configuration actually negotiated by the provider for one open stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub format: SampleFormat,
    pub sharing_mode: SharingMode,
    pub performance_mode: PerformanceMode,
    pub frames_per_burst: u32,
    pub device_id: i32,
}
