//! Persistent test configuration
//!
//! Stores the host's preferred stream parameters and test options in a JSON
//! file at a path the host supplies. Loading falls back to defaults on any
//! error; missing fields take their defaults individually.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::graph::ToneType;
use crate::stream::spec::{PerformanceMode, SampleFormat, SharingMode};

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_channel_count() -> u16 {
    2
}

fn default_tone_type() -> ToneType {
    ToneType::Sine
}

fn default_performance_mode() -> PerformanceMode {
    PerformanceMode::LowLatency
}

fn default_sharing_mode() -> SharingMode {
    SharingMode::Shared
}

fn default_format() -> SampleFormat {
    SampleFormat::Float
}

fn default_echo_delay() -> f64 {
    crate::activity::duplex::DEFAULT_ECHO_DELAY_SECONDS
}

/// Persistent test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channel_count")]
    pub channel_count: u16,
    #[serde(default = "default_format")]
    pub format: SampleFormat,
    #[serde(default = "default_sharing_mode")]
    pub sharing_mode: SharingMode,
    #[serde(default = "default_performance_mode")]
    pub performance_mode: PerformanceMode,
    #[serde(default = "default_tone_type")]
    pub tone_type: ToneType,
    #[serde(default = "default_echo_delay")]
    pub echo_delay_seconds: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channel_count: default_channel_count(),
            format: default_format(),
            sharing_mode: default_sharing_mode(),
            performance_mode: default_performance_mode(),
            tone_type: default_tone_type(),
            echo_delay_seconds: default_echo_delay(),
        }
    }
}

impl ProbeConfig {
    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProbeConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.tone_type, ToneType::Sine);
    }

    #[test]
    fn test_round_trip() {
        let config = ProbeConfig {
            sample_rate: 96000,
            channel_count: 8,
            tone_type: ToneType::SawPing,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let loaded: ProbeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.sample_rate, 96000);
        assert_eq!(loaded.channel_count, 8);
        assert_eq!(loaded.tone_type, ToneType::SawPing);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"sample_rate": 44100}"#;
        let config: ProbeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channel_count, 2);
        assert_eq!(config.performance_mode, PerformanceMode::LowLatency);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe").join("config.json");

        let config = ProbeConfig {
            sample_rate: 44100,
            echo_delay_seconds: 0.125,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ProbeConfig::load(&path);
        assert_eq!(loaded.sample_rate, 44100);
        assert!((loaded.echo_delay_seconds - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let loaded = ProbeConfig::load(Path::new("/nonexistent/probe-config.json"));
        assert_eq!(loaded.sample_rate, 48000);
    }
}
