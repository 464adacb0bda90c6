use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use voxbridge_session::MicrophoneConstraints;

use crate::audio::{AudioFormat, CHANNELS, FRAME_SIZE, SAMPLE_RATE};
use crate::{DEFAULT_API_URL, Error, Result};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "VAPI_API_KEY";

/// Top-level bridge configuration, usually loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub api: ApiConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub aec: AecConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            key: None,
        }
    }
}

/// How the local devices drive the audio units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// One blocking read/write loop per direction.
    #[default]
    Blocking,
    /// Device callbacks pull and push frames directly.
    Callback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame.
    pub frame_size: usize,
    /// Substring of the input device name; the default device when unset.
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub io_mode: IoMode,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
            input_device: None,
            output_device: None,
            io_mode: IoMode::default(),
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frame_size: self.frame_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the virtual microphone the session reads our audio from.
    pub microphone_name: String,
    /// Name of the virtual speaker remote audio is routed to.
    pub speaker_name: String,
    /// Display name of the remote participant whose audio we wait for.
    pub remote_speaker_name: String,
    pub constraints: MicrophoneConstraints,
    /// Fail the call if it is not ready within this many milliseconds.
    pub join_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            microphone_name: "my-mic".to_string(),
            speaker_name: "my-speaker".to_string(),
            remote_speaker_name: "Vapi Speaker".to_string(),
            constraints: MicrophoneConstraints::default(),
            join_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }
}

/// Local echo cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AecConfig {
    pub enabled: bool,
    /// FFT size of the adaptive filter; sub-frames are half of it.
    pub fft_size: usize,
    pub step_size: f32,
    /// Directory for WAV dumps of the capture, reference and cleaned streams.
    pub dump_dir: Option<PathBuf>,
}

impl Default for AecConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fft_size: 512,
            step_size: 0.05,
            dump_dir: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. An API key missing from the file is taken from
    /// `VAPI_API_KEY`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env(|name| std::env::var(name).ok());
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Fill unset values from the environment through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api.key.is_none() {
            self.api.key = lookup(API_KEY_ENV).filter(|key| !key.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Configuration("sample_rate must be non-zero".into()));
        }
        if self.audio.frame_size == 0 {
            return Err(Error::Configuration("frame_size must be non-zero".into()));
        }
        if self.audio.channels != 1 {
            return Err(Error::Configuration(format!(
                "only mono audio is supported, got {} channels",
                self.audio.channels
            )));
        }
        if self.aec.fft_size == 0 || !self.aec.fft_size.is_power_of_two() {
            return Err(Error::Configuration(format!(
                "aec.fft_size must be a non-zero power of two, got {}",
                self.aec.fft_size
            )));
        }
        if self.session.microphone_name.is_empty() || self.session.speaker_name.is_empty() {
            return Err(Error::Configuration(
                "virtual device names must not be empty".into(),
            ));
        }
        Ok(())
    }
}
