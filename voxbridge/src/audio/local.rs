use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, spawn_blocking};

use super::{
    AudioCaptureProducer, AudioFormat, AudioInput, AudioOutput, AudioPlaybackConsumer,
    CallbackFlow, LocalAudio, bytes_to_samples, samples_to_bytes,
};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Frames of headroom in each ring buffer.
const RING_FRAMES: usize = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(5);
const HOLD_INTERVAL: Duration = Duration::from_millis(20);

/// Local audio through the host's default backend.
///
/// Devices are opened directly at the call format. A device that does not
/// support the call's rate and channel count fails to open.
#[derive(Debug, Clone, Default)]
pub struct CpalAudio {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalAudio {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }

    pub async fn list_input_devices() -> Result<Vec<String>> {
        spawn_blocking(|| {
            let host = cpal::default_host();
            let devices = host.input_devices()?;
            Ok::<_, anyhow::Error>(devices.filter_map(|d| d.name().ok()).collect())
        })
        .await
        .map_err(|err| Error::Device(err.to_string()))?
        .map_err(device_error)
    }

    pub async fn list_output_devices() -> Result<Vec<String>> {
        spawn_blocking(|| {
            let host = cpal::default_host();
            let devices = host.output_devices()?;
            Ok::<_, anyhow::Error>(devices.filter_map(|d| d.name().ok()).collect())
        })
        .await
        .map_err(|err| Error::Device(err.to_string()))?
        .map_err(device_error)
    }
}

#[async_trait]
impl LocalAudio for CpalAudio {
    async fn open_input(&self, format: AudioFormat) -> Result<Box<dyn AudioInput>> {
        let (producer, consumer) = HeapRb::<i16>::new(format.frame_size * RING_FRAMES).split();
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let alive = Arc::new(AtomicBool::new(true));
        let name = self.input_device.clone();
        let stream_alive = alive.clone();
        let (_task, ready) = spawn_stream(
            "capture",
            move || {
                let device = find_input_device(name.as_deref())?;
                let mut producer = producer;
                let mut overflows = 0u64;
                build_input(&device, format, stream_alive, move |samples| {
                    let pushed = producer.push_slice(samples);
                    if pushed < samples.len() {
                        overflows += 1;
                        if overflows % 100 == 1 {
                            tracing::warn!("Input overflow, dropped {} samples", samples.len() - pushed);
                        }
                    }
                })
            },
            move || wait_for_stop(stop_rx),
        );
        ready
            .await
            .map_err(|_| Error::Device("capture stream task ended".into()))?
            .map_err(device_error)?;
        Ok(Box::new(CpalInput {
            consumer,
            format,
            alive,
            _stop: stop_tx,
        }))
    }

    async fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        let (producer, consumer) = HeapRb::<i16>::new(format.frame_size * RING_FRAMES).split();
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let alive = Arc::new(AtomicBool::new(true));
        let name = self.output_device.clone();
        let stream_alive = alive.clone();
        let (_task, ready) = spawn_stream(
            "playback",
            move || {
                let device = find_output_device(name.as_deref())?;
                let mut consumer = consumer;
                build_output(&device, format, stream_alive, move |out| {
                    let popped = consumer.pop_slice(out);
                    out[popped..].fill(0);
                })
            },
            move || wait_for_stop(stop_rx),
        );
        ready
            .await
            .map_err(|_| Error::Device("playback stream task ended".into()))?
            .map_err(device_error)?;
        Ok(Box::new(CpalOutput {
            producer,
            format,
            alive,
            dropped: 0,
            _stop: stop_tx,
        }))
    }

    async fn start_callbacks(
        &self,
        format: AudioFormat,
        mut capture: AudioCaptureProducer,
        mut playback: AudioPlaybackConsumer,
    ) -> Result<Vec<JoinHandle<()>>> {
        let quit = capture.quit_flag();

        let capture_stopped = Arc::new(AtomicBool::new(false));
        let input_name = self.input_device.clone();
        let (capture_task, capture_ready) = spawn_stream(
            "capture",
            {
                let stopped = capture_stopped.clone();
                move || {
                    let device = find_input_device(input_name.as_deref())?;
                    build_input(&device, format, Arc::new(AtomicBool::new(true)), move |samples| {
                        if stopped.load(Ordering::Relaxed) {
                            return;
                        }
                        if capture.on_input(&samples_to_bytes(samples)) == CallbackFlow::Stop {
                            stopped.store(true, Ordering::Release);
                        }
                    })
                }
            },
            {
                let quit = quit.clone();
                move || hold_until_stopped(&quit, &capture_stopped)
            },
        );

        let playback_stopped = Arc::new(AtomicBool::new(false));
        let output_name = self.output_device.clone();
        let (playback_task, playback_ready) = spawn_stream(
            "playback",
            {
                let stopped = playback_stopped.clone();
                let mut bytes = Vec::new();
                move || {
                    let device = find_output_device(output_name.as_deref())?;
                    build_output(&device, format, Arc::new(AtomicBool::new(true)), move |out| {
                        bytes.resize(out.len() * 2, 0);
                        if playback.on_output(&mut bytes) == CallbackFlow::Stop {
                            stopped.store(true, Ordering::Release);
                        }
                        out.copy_from_slice(&bytes_to_samples(&bytes));
                    })
                }
            },
            move || hold_until_stopped(&quit, &playback_stopped),
        );

        for ready in [capture_ready, playback_ready] {
            ready
                .await
                .map_err(|_| Error::Device("stream task ended".into()))?
                .map_err(device_error)?;
        }
        Ok(vec![capture_task, playback_task])
    }
}

struct CpalInput {
    consumer: HeapConsumer<i16>,
    format: AudioFormat,
    alive: Arc<AtomicBool>,
    // Dropping the sender releases the device.
    _stop: mpsc::Sender<()>,
}

impl AudioInput for CpalInput {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize> {
        let needed = buf.len() / 2;
        let deadline = Instant::now() + self.format.frame_duration();
        while self.consumer.len() < needed {
            if !self.alive.load(Ordering::Acquire) {
                return Err(Error::Device("input stream closed".into()));
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
            thread::sleep(POLL_INTERVAL);
        }
        let mut samples = vec![0i16; needed];
        self.consumer.pop_slice(&mut samples);
        buf.copy_from_slice(&samples_to_bytes(&samples));
        Ok(buf.len())
    }
}

struct CpalOutput {
    producer: HeapProducer<i16>,
    format: AudioFormat,
    alive: Arc<AtomicBool>,
    dropped: u64,
    _stop: mpsc::Sender<()>,
}

impl AudioOutput for CpalOutput {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let samples = bytes_to_samples(frame);
        // Paces the caller at the device's rate, but never for longer than
        // one frame so the playback unit keeps seeing the quit flag.
        let deadline = Instant::now() + self.format.frame_duration();
        while self.producer.free_len() < samples.len() {
            if !self.alive.load(Ordering::Acquire) {
                return Err(Error::Device("output stream closed".into()));
            }
            if Instant::now() >= deadline {
                self.dropped += 1;
                if self.dropped % 100 == 1 {
                    tracing::warn!("Output device is behind, dropped {} frames", self.dropped);
                }
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        self.producer.push_slice(&samples);
        Ok(())
    }
}

fn device_error(err: anyhow::Error) -> Error {
    Error::Device(err.to_string())
}

/// Build a stream on a blocking thread and keep it alive until `hold`
/// returns. The receiver reports whether the stream started.
fn spawn_stream(
    label: &'static str,
    build: impl FnOnce() -> anyhow::Result<Stream> + Send + 'static,
    hold: impl FnOnce() + Send + 'static,
) -> (JoinHandle<()>, oneshot::Receiver<anyhow::Result<()>>) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let task = spawn_blocking(move || {
        let stream = match build().and_then(|stream| {
            stream
                .play()
                .map_err(|e| anyhow!("Failed to start {} stream: {}", label, e))?;
            Ok(stream)
        }) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!("Failed to open {} stream: {}", label, err);
                let _ = ready_tx.send(Err(err));
                return;
            }
        };
        tracing::info!("Local {} stream is now playing", label);
        let _ = ready_tx.send(Ok(()));
        hold();
        tracing::debug!("Stopping local {} stream", label);
        if let Err(err) = stream.pause() {
            tracing::error!("Failed to stop {} stream: {}", label, err);
        }
    });
    (task, ready_rx)
}

fn wait_for_stop(mut stop_rx: mpsc::Receiver<()>) {
    while stop_rx.blocking_recv().is_some() {}
}

fn hold_until_stopped(quit: &AtomicBool, stopped: &AtomicBool) {
    while !quit.load(Ordering::Acquire) && !stopped.load(Ordering::Acquire) {
        thread::sleep(HOLD_INTERVAL);
    }
}

fn find_input_device(name: Option<&str>) -> anyhow::Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            tracing::info!("Opening input device matching: {}", name);
            host.input_devices()?
                .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
                .ok_or_else(|| anyhow!("Input device not found: {}", name))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device")),
    }
}

fn find_output_device(name: Option<&str>) -> anyhow::Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            tracing::info!("Opening output device matching: {}", name);
            host.output_devices()?
                .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
                .ok_or_else(|| anyhow!("Output device not found: {}", name))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device")),
    }
}

/// Pick a supported configuration matching the call format exactly,
/// preferring 16-bit samples.
fn call_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    format: AudioFormat,
) -> anyhow::Result<SupportedStreamConfig> {
    let rate = SampleRate(format.sample_rate);
    let mut candidates: Vec<_> = configs
        .filter(|c| {
            c.channels() == format.channels
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .collect();
    candidates.sort_by_key(|c| c.sample_format() != SampleFormat::I16);
    candidates
        .into_iter()
        .next()
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| {
            anyhow!(
                "Device does not support {} Hz with {} channel(s)",
                format.sample_rate,
                format.channels
            )
        })
}

fn build_input(
    device: &Device,
    format: AudioFormat,
    alive: Arc<AtomicBool>,
    on_samples: impl FnMut(&[i16]) + Send + 'static,
) -> anyhow::Result<Stream> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| anyhow!("Failed to query input configs: {}", e))?;
    let config = call_config(configs, format)?;
    let sample_format = config.sample_format();
    tracing::info!(
        "Capture device config: {} Hz, {} channels, format: {:?}",
        config.sample_rate().0,
        config.channels(),
        sample_format
    );
    let config: StreamConfig = config.into();
    match sample_format {
        SampleFormat::I16 => build_input_stream::<i16>(device, &config, alive, on_samples),
        SampleFormat::F32 => build_input_stream::<f32>(device, &config, alive, on_samples),
        SampleFormat::I32 => build_input_stream::<i32>(device, &config, alive, on_samples),
        SampleFormat::I8 => build_input_stream::<i8>(device, &config, alive, on_samples),
        SampleFormat::U16 => build_input_stream::<u16>(device, &config, alive, on_samples),
        other => Err(anyhow!("Unsupported sample format: {:?}", other)),
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    alive: Arc<AtomicBool>,
    mut on_samples: impl FnMut(&[i16]) + Send + 'static,
) -> anyhow::Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let mut callbacks = 0u64;
    let mut samples = Vec::new();
    let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        callbacks += 1;
        if callbacks % 100 == 0 {
            tracing::trace!("Audio input callback #{}, samples: {}", callbacks, data.len());
        }
        samples.clear();
        samples.extend(data.iter().map(|s| i16::from_sample(*s)));
        on_samples(&samples);
    };
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("Audio capture stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            alive.store(false, Ordering::Release);
        }
    };
    device
        .build_input_stream(config, data_fn, err_fn, None)
        .map_err(|e| anyhow!("Failed to build input stream: {}", e))
}

/// `fill` supplies call samples; shortfalls are played as silence.
fn build_output(
    device: &Device,
    format: AudioFormat,
    alive: Arc<AtomicBool>,
    fill: impl FnMut(&mut [i16]) + Send + 'static,
) -> anyhow::Result<Stream> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| anyhow!("Failed to query output configs: {}", e))?;
    let config = call_config(configs, format)?;
    let sample_format = config.sample_format();
    tracing::info!(
        "Playback device config: {} Hz, {} channels, format: {:?}",
        config.sample_rate().0,
        config.channels(),
        sample_format
    );
    let config: StreamConfig = config.into();
    match sample_format {
        SampleFormat::I16 => build_output_stream::<i16>(device, &config, alive, fill),
        SampleFormat::F32 => build_output_stream::<f32>(device, &config, alive, fill),
        SampleFormat::I32 => build_output_stream::<i32>(device, &config, alive, fill),
        SampleFormat::I8 => build_output_stream::<i8>(device, &config, alive, fill),
        SampleFormat::U16 => build_output_stream::<u16>(device, &config, alive, fill),
        other => Err(anyhow!("Unsupported sample format: {:?}", other)),
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    alive: Arc<AtomicBool>,
    mut fill: impl FnMut(&mut [i16]) + Send + 'static,
) -> anyhow::Result<Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let mut samples = Vec::new();
    let data_fn = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        samples.resize(data.len(), 0i16);
        fill(&mut samples);
        for (out, sample) in data.iter_mut().zip(&samples) {
            *out = T::from_sample(*sample);
        }
    };
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("Audio playback stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            alive.store(false, Ordering::Release);
        }
    };
    device
        .build_output_stream(config, data_fn, err_fn, None)
        .map_err(|e| anyhow!("Failed to build output stream: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SupportedBufferSize;

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn call_config_prefers_i16_at_call_rate() {
        let configs = vec![
            range(2, 8000, 48000, SampleFormat::I16),
            range(1, 8000, 48000, SampleFormat::F32),
            range(1, 8000, 48000, SampleFormat::I16),
        ];
        let config = call_config(configs.into_iter(), AudioFormat::default()).unwrap();
        assert_eq!(config.channels(), 1);
        assert_eq!(config.sample_rate(), SampleRate(16000));
        assert_eq!(config.sample_format(), SampleFormat::I16);
    }

    fn output(ring_frames: usize, alive: bool) -> (CpalOutput, HeapConsumer<i16>) {
        let format = AudioFormat::default();
        let (producer, consumer) = HeapRb::<i16>::new(format.frame_size * ring_frames).split();
        let (stop_tx, _stop_rx) = mpsc::channel::<()>(1);
        let output = CpalOutput {
            producer,
            format,
            alive: Arc::new(AtomicBool::new(alive)),
            dropped: 0,
            _stop: stop_tx,
        };
        (output, consumer)
    }

    #[test]
    fn full_ring_drops_frame_within_one_frame() {
        let (mut output, consumer) = output(1, true);
        let format = AudioFormat::default();
        output.write_frame(&format.silence()).unwrap();
        assert_eq!(consumer.len(), format.frame_size);

        let started = Instant::now();
        output.write_frame(&format.silence()).unwrap();
        assert!(started.elapsed() < format.frame_duration() * 2);
        assert_eq!(output.dropped, 1);
        assert_eq!(consumer.len(), format.frame_size);
    }

    #[test]
    fn closed_output_stream_is_an_error() {
        let (mut output, _consumer) = output(1, false);
        let format = AudioFormat::default();
        output.write_frame(&format.silence()).unwrap();
        assert!(matches!(
            output.write_frame(&format.silence()),
            Err(Error::Device(_))
        ));
    }

    #[test]
    fn call_config_rejects_unsupported_rate() {
        let configs = vec![range(1, 44100, 48000, SampleFormat::F32)];
        assert!(call_config(configs.into_iter(), AudioFormat::default()).is_err());
    }
}
