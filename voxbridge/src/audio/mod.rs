mod capture;
mod local;
mod playback;

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::{Error, Result};

pub use capture::{AudioCaptureProducer, CaptureSink};
pub use local::CpalAudio;
pub use playback::AudioPlaybackConsumer;

pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u16 = 1;
pub const FRAME_SIZE: usize = 640;
pub const BYTES_PER_SAMPLE: usize = 2;

/// PCM layout shared by every buffer in the pipeline: signed 16-bit
/// little-endian samples, fixed frame length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame.
    pub frame_size: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
        }
    }
}

impl AudioFormat {
    pub fn frame_bytes(&self) -> usize {
        self.frame_size * self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate as u64)
    }

    pub fn silence(&self) -> Vec<u8> {
        vec![0; self.frame_bytes()]
    }
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Trailing odd bytes are ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// What a device-driven callback tells the audio subsystem after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    Continue,
    Stop,
}

/// Local capture device opened for one call.
pub trait AudioInput: Send {
    /// Fill `buf` with exactly one frame. Returns `buf.len()` on success or `0`
    /// when a full frame is not available yet; overflow is reported the same way.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Local playback device opened for one call.
pub trait AudioOutput: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;
}

/// Host audio backend.
///
/// Devices are released when the returned handles are dropped, which happens
/// on every exit path of the unit that owns them.
#[async_trait]
pub trait LocalAudio: Send + Sync {
    async fn open_input(&self, format: AudioFormat) -> Result<Box<dyn AudioInput>>;

    async fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>>;

    /// Drive `capture` and `playback` from device callbacks instead of
    /// blocking loops. Returns the units to await on shutdown.
    async fn start_callbacks(
        &self,
        _format: AudioFormat,
        _capture: AudioCaptureProducer,
        _playback: AudioPlaybackConsumer,
    ) -> Result<Vec<JoinHandle<()>>> {
        Err(Error::Device(
            "callback-driven I/O is not supported by this backend".into(),
        ))
    }
}
