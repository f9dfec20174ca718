//! Activity selector
//!
//! Process-wide switch over the pre-allocated activity variants. Every
//! variant is constructed once and lives for the selector's lifetime;
//! selection never recreates an activity, and the current activity is never
//! "none": unknown or undefined types fall back to the output test.

use std::sync::Arc;

use crate::capability::MmapProbe;
use crate::stream::provider::StreamProvider;

use super::duplex::{ActivityEcho, ActivityGlitches, ActivityRoundTripLatency};
use super::input::{ActivityRecording, ActivityTestInput};
use super::output::{ActivityTapToTone, ActivityTestOutput};
use super::{Activity, ActivityType};

/// Holds one instance of every activity variant and exposes the current one
/// to the control thread.
pub struct ActivitySelector {
    activity_type: ActivityType,
    test_output: Activity,
    test_input: Activity,
    tap_to_tone: Activity,
    record_play: Activity,
    echo: Activity,
    round_trip_latency: Activity,
    glitches: Activity,
}

impl ActivitySelector {
    /// Construct every variant against the injected provider and capability
    /// probe, both resolved once at startup.
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            activity_type: ActivityType::Undefined,
            test_output: Activity::TestOutput(ActivityTestOutput::new(
                Arc::clone(&provider),
                Arc::clone(&mmap_probe),
            )),
            test_input: Activity::TestInput(ActivityTestInput::new(
                Arc::clone(&provider),
                Arc::clone(&mmap_probe),
            )),
            tap_to_tone: Activity::TapToTone(ActivityTapToTone::new(
                Arc::clone(&provider),
                Arc::clone(&mmap_probe),
            )),
            record_play: Activity::RecordPlay(ActivityRecording::new(
                Arc::clone(&provider),
                Arc::clone(&mmap_probe),
            )),
            echo: Activity::Echo(ActivityEcho::new(
                Arc::clone(&provider),
                Arc::clone(&mmap_probe),
            )),
            round_trip_latency: Activity::RoundTripLatency(ActivityRoundTripLatency::new(
                Arc::clone(&provider),
                Arc::clone(&mmap_probe),
            )),
            glitches: Activity::Glitches(ActivityGlitches::new(provider, mmap_probe)),
        }
    }

    /// Select the current activity from a raw host value. Unknown values and
    /// `Undefined` map to the output test, so callers always receive a
    /// usable activity.
    pub fn set_activity_type(&mut self, raw: i32) {
        self.activity_type = ActivityType::from_raw(raw);
        tracing::debug!(raw, activity = ?self.activity_type, "set_activity_type");
    }

    pub fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    pub fn current_activity(&mut self) -> &mut Activity {
        match self.activity_type {
            ActivityType::TestInput => &mut self.test_input,
            ActivityType::TapToTone => &mut self.tap_to_tone,
            ActivityType::RecordPlay => &mut self.record_play,
            ActivityType::Echo => &mut self.echo,
            ActivityType::RoundTripLatency => &mut self.round_trip_latency,
            ActivityType::Glitches => &mut self.glitches,
            ActivityType::Undefined | ActivityType::TestOutput => &mut self.test_output,
        }
    }

    /// Routed to the echo variant unconditionally, even when it is not
    /// current: the host may pre-configure the delay before switching modes.
    pub fn set_delay_time(&mut self, seconds: f64) {
        if let Activity::Echo(echo) = &mut self.echo {
            echo.set_delay_time(seconds);
        }
    }
}
