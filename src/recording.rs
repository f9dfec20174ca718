//! In-memory multichannel recording
//!
//! Captured audio is transported out of the input callback through an SPSC
//! ring buffer (the callback only pushes, never allocates or locks) and
//! assembled into an immutable [`MultiChannelRecording`] on the control
//! thread. Playback reads the recording sequentially through a
//! [`PlaybackCursor`] owned by the playback stream's render callback.
//!
//! Recordings are bounded and live in memory only; nothing is persisted.

use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Maximum recording length in seconds; older samples are dropped once the
/// ring is full
pub const MAX_RECORDING_SECONDS: usize = 10;

/// Create the capture transport for a recording: the producer moves into the
/// input callback, the consumer stays with the activity.
pub fn recording_channel(
    sample_rate: u32,
    channel_count: usize,
) -> (HeapProd<f32>, HeapCons<f32>) {
    let capacity = MAX_RECORDING_SECONDS * sample_rate as usize * channel_count.max(1);
    HeapRb::<f32>::new(capacity).split()
}

/// An immutable captured buffer, shared with the playback callback.
#[derive(Debug)]
pub struct MultiChannelRecording {
    channel_count: usize,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl MultiChannelRecording {
    /// Drain everything currently in the capture ring into a recording.
    pub fn drain(consumer: &mut HeapCons<f32>, sample_rate: u32, channel_count: usize) -> Self {
        let mut samples = Vec::with_capacity(consumer.occupied_len());
        samples.extend(consumer.pop_iter());
        // Keep whole frames only
        let channels = channel_count.max(1);
        samples.truncate(samples.len() - samples.len() % channels);

        tracing::info!(
            frames = samples.len() / channels,
            channels,
            sample_rate,
            "Recording captured"
        );

        Self {
            channel_count: channels,
            sample_rate,
            samples,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channel_count
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Sequential reader over a recording, owned by the playback render
/// callback. Plays the capture once, then silence.
#[derive(Debug)]
pub struct PlaybackCursor {
    recording: Arc<MultiChannelRecording>,
    frame_position: usize,
}

impl PlaybackCursor {
    pub fn new(recording: Arc<MultiChannelRecording>) -> Self {
        Self {
            recording,
            frame_position: 0,
        }
    }

    /// Fill an interleaved output buffer, adapting the channel count by
    /// truncation/repetition of the last source channel.
    pub fn render(&mut self, out: &mut [f32], out_channels: usize) {
        let channels = out_channels.max(1);
        let rec_channels = self.recording.channel_count();
        let total_frames = self.recording.frame_count();

        for frame in out.chunks_mut(channels) {
            if self.frame_position >= total_frames {
                frame.fill(0.0);
                continue;
            }
            let base = self.frame_position * rec_channels;
            let source = &self.recording.samples()[base..base + rec_channels];
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = *source.get(ch).unwrap_or(source.last().unwrap_or(&0.0));
            }
            self.frame_position += 1;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frame_position >= self.recording.frame_count()
    }
}
