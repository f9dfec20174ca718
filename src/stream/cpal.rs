//! cpal-backed stream provider
//!
//! Adapts the [`StreamProvider`] contract onto cpal: device discovery,
//! configuration negotiation against the device defaults, and stream
//! construction with the activity's render/capture closures installed as the
//! cpal data callbacks.
//!
//! cpal always delivers push callbacks, so this provider never takes the
//! blocking-I/O path. Stream handles are `!Send` and stay on the control
//! thread.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate};

use super::provider::{CaptureFn, ProviderStream, RenderFn, StreamError, StreamProvider};
use super::spec::{Direction, SampleFormat, StreamConfig, StreamSpec};

/// cpal stream provider using the platform's default host
pub struct CpalProvider {
    host: Host,
}

impl CpalProvider {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// Pick the device for a spec. Device id 0 selects the default device;
    /// positive ids index the host's device enumeration (1-based), matching
    /// the order the host UI presents.
    fn pick_device(&self, direction: Direction, device_id: i32) -> Result<Device> {
        if device_id > 0 {
            if let Some(device) = self.host.devices()?.nth(device_id as usize - 1) {
                return Ok(device);
            }
            tracing::warn!(device_id, "Requested device not found, using default");
        }
        match direction {
            Direction::Input => self
                .host
                .default_input_device()
                .ok_or_else(|| anyhow!("No default input device")),
            Direction::Output => self
                .host
                .default_output_device()
                .ok_or_else(|| anyhow!("No default output device")),
        }
    }

    fn cpal_config(config: &StreamConfig) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: config.channel_count,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

impl Default for CpalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamProvider for CpalProvider {
    fn negotiate(&self, spec: &StreamSpec) -> Result<StreamConfig, StreamError> {
        let device = self
            .pick_device(spec.direction, spec.device_id)
            .map_err(|e| StreamError::Rejected(e.to_string()))?;

        let default = match spec.direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        }
        .map_err(|e| StreamError::Rejected(e.to_string()))?;

        let sample_rate = if spec.sample_rate == 0 {
            default.sample_rate().0
        } else {
            spec.sample_rate
        };
        let channel_count = if spec.channel_count == 0 {
            default.channels()
        } else {
            spec.channel_count.min(default.channels().max(1))
        };

        tracing::info!(
            direction = ?spec.direction,
            sample_rate,
            channel_count,
            requested_rate = spec.sample_rate,
            "Negotiated stream configuration"
        );

        Ok(StreamConfig {
            sample_rate,
            channel_count,
            // cpal buffers are rendered as f32; an I16 request is honored by
            // the flow-graph sink, which quantizes to 16 bits.
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
        mut render: RenderFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError> {
        let device = self
            .pick_device(Direction::Output, config.device_id)
            .map_err(|e| StreamError::Rejected(e.to_string()))?;

        let stream = device
            .build_output_stream(
                &Self::cpal_config(config),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| StreamError::Rejected(e.to_string()))?;

        Ok(Box::new(CpalStream {
            stream,
            config: config.clone(),
            direction: Direction::Output,
        }))
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        mut capture: CaptureFn,
    ) -> Result<Box<dyn ProviderStream>, StreamError> {
        let device = self
            .pick_device(Direction::Input, config.device_id)
            .map_err(|e| StreamError::Rejected(e.to_string()))?;

        let stream = device
            .build_input_stream(
                &Self::cpal_config(config),
                move |data: &[f32], _: &cpal::InputCallbackInfo| capture(data),
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| StreamError::Rejected(e.to_string()))?;

        Ok(Box::new(CpalStream {
            stream,
            config: config.clone(),
            direction: Direction::Input,
        }))
    }

    fn supports_callbacks(&self) -> bool {
        true
    }
}

struct CpalStream {
    stream: cpal::Stream,
    config: StreamConfig,
    direction: Direction,
}

impl ProviderStream for CpalStream {
    fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn request_start(&mut self) -> Result<(), StreamError> {
        self.stream
            .play()
            .map_err(|e| StreamError::Rejected(e.to_string()))
    }

    fn request_pause(&mut self) -> Result<(), StreamError> {
        self.stream
            .pause()
            .map_err(|e| StreamError::Rejected(e.to_string()))
    }

    fn request_stop(&mut self) -> Result<(), StreamError> {
        // cpal has no stop distinct from pause; the handle drop on close
        // releases the device.
        self.stream
            .pause()
            .map_err(|e| StreamError::Rejected(e.to_string()))
    }
}
