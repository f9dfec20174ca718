//! Shared test fixtures
//!
//! A provider wrapper that counts stop requests and can inject stop
//! failures on output streams, for exercising partial-failure teardown
//! policies.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use audioprobe::stream::loopback::{LoopbackOptions, LoopbackProvider};
use audioprobe::stream::provider::{
    BlockingReader, BlockingWriter, CaptureFn, ProviderStream, RenderFn, StreamError,
    StreamProvider,
};
use audioprobe::stream::spec::{Direction, StreamConfig, StreamSpec};

pub struct FlakyStopProvider {
    inner: LoopbackProvider,
    pub output_stops: Arc<AtomicUsize>,
    pub input_stops: Arc<AtomicUsize>,
    pub fail_output_stop: bool,
}

impl FlakyStopProvider {
    pub fn new(fail_output_stop: bool) -> Self {
        Self {
            inner: LoopbackProvider::new(LoopbackOptions::default()),
            output_stops: Arc::new(AtomicUsize::new(0)),
            input_stops: Arc::new(AtomicUsize::new(0)),
            fail_output_stop,
        }
    }
}

impl StreamProvider for FlakyStopProvider {
    fn negotiate(&self, spec: &StreamSpec) -> Result<StreamConfig, StreamError> {
        self.inner.negotiate(spec)
    }

    fn open_output(
        &self,
        config: &StreamConfig,
        render: RenderFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError> {
        let stream = self.inner.open_output(config, render)?;
        Ok(Box::new(CountingStream {
            inner: stream,
            stops: Arc::clone(&self.output_stops),
            fail_stop: self.fail_output_stop,
        }))
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        capture: CaptureFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError> {
        let stream = self.inner.open_input(config, capture)?;
        Ok(Box::new(CountingStream {
            inner: stream,
            stops: Arc::clone(&self.input_stops),
            fail_stop: false,
        }))
    }

    fn supports_callbacks(&self) -> bool {
        self.inner.supports_callbacks()
    }
}

struct CountingStream {
    inner: Box<dyn ProviderStream>,
    stops: Arc<AtomicUsize>,
    fail_stop: bool,
}

impl ProviderStream for CountingStream {
    fn config(&self) -> &StreamConfig {
        self.inner.config()
    }

    fn direction(&self) -> Direction {
        self.inner.direction()
    }

    fn request_start(&mut self) -> Result<(), StreamError> {
        self.inner.request_start()
    }

    fn request_pause(&mut self) -> Result<(), StreamError> {
        self.inner.request_pause()
    }

    fn request_stop(&mut self) -> Result<(), StreamError> {
        self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let result = self.inner.request_stop();
        if self.fail_stop {
            return Err(StreamError::Rejected("injected stop failure".into()));
        }
        result
    }

    fn take_reader(&mut self) -> Option<Box<dyn BlockingReader>> {
        self.inner.take_reader()
    }

    fn take_writer(&mut self) -> Option<Box<dyn BlockingWriter>> {
        self.inner.take_writer()
    }
}
