//! Shared activity lifecycle machinery
//!
//! Every activity variant embeds an [`ActivityBase`]: the stream slot pool,
//! the Closed → Opened → Started → Stopped lifecycle, callback statistics,
//! the blocking-I/O fallback thread, and the capability probe. Variants add
//! their own wiring (flow graph, analyzer, recording) on top.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::capability::MmapProbe;
use crate::stream::provider::{ProviderStream, StreamError, StreamProvider};
use crate::stream::spec::{Direction, StreamConfig};

use super::slots::{SlotEntry, SlotId, StreamPool};

/// Activity lifecycle position. The cycle repeats: closing every slot
/// returns to `Closed`, and a stopped activity may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Closed,
    Opened,
    Started,
    Stopped,
}

/// Shared lifecycle state machine embedded in every activity variant.
pub struct ActivityBase {
    provider: Arc<dyn StreamProvider>,
    mmap_probe: Arc<dyn MmapProbe>,
    pool: StreamPool,
    lifecycle: Lifecycle,
    callback_count: Arc<AtomicU64>,
    callback_size: u32,
    last_config: Option<StreamConfig>,
    thread_enabled: Arc<AtomicBool>,
    data_thread: Option<JoinHandle<()>>,
}

impl ActivityBase {
    pub fn new(provider: Arc<dyn StreamProvider>, mmap_probe: Arc<dyn MmapProbe>) -> Self {
        Self {
            provider,
            mmap_probe,
            pool: StreamPool::new(),
            lifecycle: Lifecycle::Closed,
            callback_count: Arc::new(AtomicU64::new(0)),
            callback_size: 0,
            last_config: None,
            thread_enabled: Arc::new(AtomicBool::new(false)),
            data_thread: None,
        }
    }

    pub fn provider(&self) -> Arc<dyn StreamProvider> {
        Arc::clone(&self.provider)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn pool(&self) -> &StreamPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut StreamPool {
        &mut self.pool
    }

    /// Place a freshly opened stream into a slot and note the negotiated
    /// configuration. Fails with `NoFreeSlots` without touching existing
    /// slots.
    pub fn install_stream(
        &mut self,
        stream: Box<dyn ProviderStream>,
        config: StreamConfig,
        direction: Direction,
    ) -> Result<SlotId, StreamError> {
        let id = self.pool.allocate(SlotEntry {
            stream,
            config: config.clone(),
            direction,
        })?;
        tracing::info!(
            slot = id.index(),
            ?direction,
            sample_rate = config.sample_rate,
            channels = config.channel_count,
            frames_per_burst = config.frames_per_burst,
            "Stream opened"
        );
        self.last_config = Some(config);
        self.lifecycle = Lifecycle::Opened;
        Ok(id)
    }

    /// Counter incremented once per callback by the variant's closures.
    pub fn callback_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.callback_count)
    }

    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    /// Override the frames-per-callback used for diagnostics; 0 means "use
    /// the negotiated burst size".
    pub fn set_callback_size(&mut self, frames: u32) {
        self.callback_size = frames;
    }

    pub fn frames_per_block(&self) -> u32 {
        if self.callback_size != 0 {
            self.callback_size
        } else {
            self.frames_per_burst()
        }
    }

    // Activity-wide accessors report the most recently opened stream; the
    // authoritative per-stream values live in the slot entries.
    pub fn frames_per_burst(&self) -> u32 {
        self.last_config.as_ref().map(|c| c.frames_per_burst).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.last_config.as_ref().map(|c| c.sample_rate).unwrap_or(0)
    }

    pub fn channel_count(&self) -> u16 {
        self.last_config.as_ref().map(|c| c.channel_count).unwrap_or(0)
    }

    /// Start every open stream in slot order.
    pub fn start_all(&mut self) -> Result<(), StreamError> {
        if self.pool.is_empty() {
            return Err(StreamError::NotOpen);
        }
        for entry in self.pool.iter_mut() {
            entry.stream.request_start()?;
        }
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    /// Start input streams before output streams. Full-duplex variants use
    /// this so the first output buffer never underruns waiting for input.
    pub fn start_inputs_then_outputs(&mut self) -> Result<(), StreamError> {
        if self.pool.is_empty() {
            return Err(StreamError::NotOpen);
        }
        for entry in self.pool.iter_mut() {
            if entry.direction == Direction::Input {
                entry.stream.request_start()?;
            }
        }
        for entry in self.pool.iter_mut() {
            if entry.direction == Direction::Output {
                entry.stream.request_start()?;
            }
        }
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    /// Pause every open stream; best effort, first non-OK result returned.
    pub fn pause_all(&mut self) -> Result<(), StreamError> {
        let mut result = Ok(());
        for entry in self.pool.iter_mut() {
            let r = entry.stream.request_pause();
            if result.is_ok() {
                result = r;
            }
        }
        result
    }

    /// Stop every open stream. Idempotent: stopping an activity that is not
    /// started is a no-op. Every stream is stopped even if an earlier one
    /// fails; the first non-OK result is returned.
    pub fn stop_all(&mut self) -> Result<(), StreamError> {
        if self.lifecycle != Lifecycle::Started {
            return Ok(());
        }
        self.stop_blocking_io_thread();

        let mut result = Ok(());
        for entry in self.pool.iter_mut() {
            let r = entry.stream.request_stop();
            if result.is_ok() {
                result = r;
            }
        }
        self.lifecycle = Lifecycle::Stopped;
        result
    }

    /// Stop and drop one stream without touching the blocking-I/O thread.
    /// Used for auxiliary streams (playback) torn down mid-run.
    pub fn release_stream(&mut self, raw: i32) -> Result<(), StreamError> {
        let mut entry = self.pool.release(raw)?;
        let result = entry.stream.request_stop();
        drop(entry);
        if self.pool.is_empty() {
            self.lifecycle = Lifecycle::Closed;
        }
        result
    }

    /// Release one slot and its provider handle. The blocking-I/O thread is
    /// stopped first so nothing races the stream teardown; the provider
    /// handle is dropped only after its stop request.
    pub fn close_slot(&mut self, raw: i32) -> Result<(), StreamError> {
        self.stop_blocking_io_thread();

        let mut entry = self.pool.release(raw)?;
        let _ = entry.stream.request_stop();
        drop(entry);

        if self.pool.is_empty() {
            self.lifecycle = Lifecycle::Closed;
            tracing::info!("All slots released, activity closed");
        } else {
            tracing::info!(slot = raw, remaining = self.pool.occupied(), "Slot released");
        }
        Ok(())
    }

    /// Spawn the blocking-I/O fallback thread. The closure receives the
    /// enabled flag and must re-check it between blocking calls; each call
    /// is bounded by the reader's poll timeout, which bounds the shutdown
    /// latency of [`Self::stop_blocking_io_thread`].
    pub fn spawn_blocking_io<F>(&mut self, f: F) -> Result<(), StreamError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        if self.data_thread.is_some() {
            return Err(StreamError::Unsupported("blocking-I/O thread already running"));
        }
        self.thread_enabled.store(true, Ordering::Release);
        let enabled = Arc::clone(&self.thread_enabled);

        let handle = std::thread::Builder::new()
            .name("audioprobe-io".into())
            .spawn(move || {
                tracing::debug!("Blocking-I/O thread entered");
                f(enabled);
                tracing::debug!("Blocking-I/O thread exiting");
            })
            .map_err(|_| StreamError::Unsupported("failed to spawn blocking-I/O thread"))?;
        self.data_thread = Some(handle);
        Ok(())
    }

    /// Clear the enabled flag and join the blocking-I/O thread. Returns only
    /// after the thread has fully exited, so no stream or buffer can be
    /// destroyed while the loop might still touch it.
    pub fn stop_blocking_io_thread(&mut self) {
        if let Some(handle) = self.data_thread.take() {
            self.thread_enabled.store(false, Ordering::Release);
            if handle.join().is_err() {
                tracing::error!("Blocking-I/O thread panicked");
            }
        }
    }

    pub fn blocking_io_running(&self) -> bool {
        self.data_thread.is_some()
    }

    /// Probe the memory-mapped fast-path capability of one stream. An
    /// unavailable probe reads as `false` (capability unknown), never an
    /// error.
    pub fn is_mmap_used(&self, raw: i32) -> Result<bool, StreamError> {
        let entry = self.pool.get(raw)?;
        Ok(self
            .mmap_probe
            .is_mmap_used(entry.stream.as_ref())
            .unwrap_or(false))
    }

    pub fn note_started(&mut self) {
        self.lifecycle = Lifecycle::Started;
    }
}

impl Drop for ActivityBase {
    fn drop(&mut self) {
        self.stop_blocking_io_thread();
    }
}
