//! Test activities
//!
//! A closed set of activity variants behind one dispatch enum, replacing a
//! virtual hierarchy: each variant embeds the shared [`base::ActivityBase`]
//! lifecycle machinery and adds its own wiring. The host addresses
//! activities by [`ActivityType`], whose numeric values are a stable
//! cross-boundary contract.

pub mod base;
pub mod duplex;
pub mod input;
pub mod output;
pub mod selector;
pub mod slots;

use crate::graph::ToneType;
use crate::stream::provider::StreamError;
use crate::stream::spec::StreamSpec;

use base::ActivityBase;
use duplex::{ActivityEcho, ActivityGlitches, ActivityRoundTripLatency};
use input::{ActivityRecording, ActivityTestInput};
use output::{ActivityTapToTone, ActivityTestOutput};
use slots::SlotId;

/// Test mode selector shared with the host UI.
///
/// Stable contract values: Undefined = -1, TestOutput = 0, TestInput = 1,
/// TapToTone = 2, RecordPlay = 3, Echo = 4, RoundTripLatency = 5,
/// Glitches = 6. Must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Undefined,
    TestOutput,
    TestInput,
    TapToTone,
    RecordPlay,
    Echo,
    RoundTripLatency,
    Glitches,
}

impl ActivityType {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::TestOutput,
            1 => Self::TestInput,
            2 => Self::TapToTone,
            3 => Self::RecordPlay,
            4 => Self::Echo,
            5 => Self::RoundTripLatency,
            6 => Self::Glitches,
            _ => Self::Undefined,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Undefined => -1,
            Self::TestOutput => 0,
            Self::TestInput => 1,
            Self::TapToTone => 2,
            Self::RecordPlay => 3,
            Self::Echo => 4,
            Self::RoundTripLatency => 5,
            Self::Glitches => 6,
        }
    }
}

/// One pre-allocated activity variant, dispatched by match.
pub enum Activity {
    TestOutput(ActivityTestOutput),
    TestInput(ActivityTestInput),
    TapToTone(ActivityTapToTone),
    RecordPlay(ActivityRecording),
    Echo(ActivityEcho),
    RoundTripLatency(ActivityRoundTripLatency),
    Glitches(ActivityGlitches),
}

impl Activity {
    pub fn base(&self) -> &ActivityBase {
        match self {
            Activity::TestOutput(a) => a.base(),
            Activity::TestInput(a) => a.base(),
            Activity::TapToTone(a) => a.base(),
            Activity::RecordPlay(a) => a.base(),
            Activity::Echo(a) => a.base(),
            Activity::RoundTripLatency(a) => a.base(),
            Activity::Glitches(a) => a.base(),
        }
    }

    pub fn base_mut(&mut self) -> &mut ActivityBase {
        match self {
            Activity::TestOutput(a) => a.base_mut(),
            Activity::TestInput(a) => a.base_mut(),
            Activity::TapToTone(a) => a.base_mut(),
            Activity::RecordPlay(a) => a.base_mut(),
            Activity::Echo(a) => a.base_mut(),
            Activity::RoundTripLatency(a) => a.base_mut(),
            Activity::Glitches(a) => a.base_mut(),
        }
    }

    /// Request a stream matching the spec; the provider's actual
    /// configuration may differ. Fails when no slot is free or the provider
    /// rejects the request.
    pub fn open(&mut self, spec: &StreamSpec) -> Result<SlotId, StreamError> {
        match self {
            Activity::TestOutput(a) => a.open(spec),
            Activity::TestInput(a) => a.open(spec),
            Activity::TapToTone(a) => a.open(spec),
            Activity::RecordPlay(a) => a.open(spec),
            Activity::Echo(a) => a.open(spec),
            Activity::RoundTripLatency(a) => a.open(spec),
            Activity::Glitches(a) => a.open(spec),
        }
    }

    pub fn start(&mut self) -> Result<(), StreamError> {
        match self {
            Activity::TestOutput(a) => a.start(),
            Activity::TestInput(a) => a.start(),
            Activity::TapToTone(a) => a.start(),
            Activity::RecordPlay(a) => a.start(),
            Activity::Echo(a) => a.start(),
            Activity::RoundTripLatency(a) => a.start(),
            Activity::Glitches(a) => a.start(),
        }
    }

    pub fn pause(&mut self) -> Result<(), StreamError> {
        self.base_mut().pause_all()
    }

    /// Idempotent; variant-specific teardown order (playback first for the
    /// recording activity, terminal analyzer state for the glitch test).
    pub fn stop(&mut self) -> Result<(), StreamError> {
        match self {
            Activity::TestOutput(a) => a.stop(),
            Activity::TestInput(a) => a.stop(),
            Activity::TapToTone(a) => a.stop(),
            Activity::RecordPlay(a) => a.stop(),
            Activity::Echo(a) => a.stop(),
            Activity::RoundTripLatency(a) => a.stop(),
            Activity::Glitches(a) => a.stop(),
        }
    }

    pub fn close(&mut self, slot: i32) -> Result<(), StreamError> {
        match self {
            Activity::TestOutput(a) => a.close(slot),
            Activity::TestInput(a) => a.close(slot),
            Activity::TapToTone(a) => a.close(slot),
            Activity::RecordPlay(a) => a.close(slot),
            Activity::Echo(a) => a.close(slot),
            Activity::RoundTripLatency(a) => a.close(slot),
            Activity::Glitches(a) => a.close(slot),
        }
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        match self {
            Activity::TestOutput(a) => a.set_amplitude(amplitude),
            Activity::TapToTone(a) => a.set_amplitude(amplitude),
            _ => {}
        }
    }

    pub fn set_channel_enabled(&mut self, channel: i32, enabled: bool) {
        match self {
            Activity::TestOutput(a) => a.set_channel_enabled(channel, enabled),
            Activity::TapToTone(a) => a.set_channel_enabled(channel, enabled),
            _ => {}
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Activity::TestOutput(a) => a.set_enabled(enabled),
            Activity::TapToTone(a) => a.set_enabled(enabled),
            _ => {}
        }
    }

    pub fn set_tone_type(&mut self, tone: ToneType) {
        if let Activity::TestOutput(a) = self {
            a.set_tone_type(tone);
        }
    }

    pub fn get_peak_level(&self, channel: i32) -> f64 {
        match self {
            Activity::TestInput(a) => a.peak_level(channel),
            Activity::RecordPlay(a) => a.peak_level(channel),
            _ => 0.0,
        }
    }

    pub fn get_callback_count(&self) -> u64 {
        self.base().callback_count()
    }

    pub fn get_frames_per_block(&self) -> u32 {
        self.base().frames_per_block()
    }

    pub fn is_mmap_used(&self, slot: i32) -> Result<bool, StreamError> {
        self.base().is_mmap_used(slot)
    }

    /// Analyzer state for the full-duplex tests; -1 for activities without
    /// an analyzer.
    pub fn get_state(&self) -> i32 {
        match self {
            Activity::RoundTripLatency(a) => a.state().as_raw(),
            Activity::Glitches(a) => a.state().as_raw(),
            _ => -1,
        }
    }

    /// Analyzer result: measured latency in frames, or the glitch count;
    /// -1 for activities without an analyzer.
    pub fn get_result(&self) -> i32 {
        match self {
            Activity::RoundTripLatency(a) => a.result_frames(),
            Activity::Glitches(a) => a.glitch_count() as i32,
            _ => -1,
        }
    }

    pub fn is_analyzer_done(&self) -> bool {
        match self {
            Activity::RoundTripLatency(a) => a.is_analyzer_done(),
            Activity::Glitches(a) => a.is_analyzer_done(),
            _ => false,
        }
    }

    pub fn get_reset_count(&self) -> i32 {
        match self {
            Activity::RoundTripLatency(a) => a.reset_count() as i32,
            Activity::Glitches(a) => a.reset_count() as i32,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_values_are_stable() {
        assert_eq!(ActivityType::Undefined.as_raw(), -1);
        assert_eq!(ActivityType::TestOutput.as_raw(), 0);
        assert_eq!(ActivityType::TestInput.as_raw(), 1);
        assert_eq!(ActivityType::TapToTone.as_raw(), 2);
        assert_eq!(ActivityType::RecordPlay.as_raw(), 3);
        assert_eq!(ActivityType::Echo.as_raw(), 4);
        assert_eq!(ActivityType::RoundTripLatency.as_raw(), 5);
        assert_eq!(ActivityType::Glitches.as_raw(), 6);
    }

    #[test]
    fn test_activity_type_round_trips() {
        for raw in -1..=6 {
            assert_eq!(ActivityType::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(ActivityType::from_raw(99), ActivityType::Undefined);
    }
}
