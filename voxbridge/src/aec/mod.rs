//! Optional echo-cancellation stage between the local microphone and the
//! session's virtual microphone.
//!
//! The capture unit appends raw microphone bytes, the playback unit appends
//! exactly what it handed to the speaker, and a forwarder drains cleaned
//! frames with [`EchoCancellationStage::read_processed`].

mod canceller;
mod forwarder;
mod recorder;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Result;
use crate::audio::{AudioFormat, bytes_to_samples, samples_to_bytes};
use crate::config::AecConfig;

pub use canceller::{EchoCanceller, FdafCanceller};
pub use forwarder::AecForwarder;
pub use recorder::AecRecorder;

type ByteQueue = Arc<Mutex<VecDeque<u8>>>;

/// Producer side of the capture queue.
#[derive(Clone)]
pub struct CaptureHandle(ByteQueue);

impl CaptureHandle {
    pub fn append(&self, bytes: &[u8]) {
        self.0.lock().extend(bytes);
    }
}

/// Producer side of the speaker reference queue.
#[derive(Clone)]
pub struct ReferenceHandle(ByteQueue);

impl ReferenceHandle {
    pub fn append(&self, bytes: &[u8]) {
        self.0.lock().extend(bytes);
    }
}

pub struct EchoCancellationStage {
    capture: ByteQueue,
    reference: ByteQueue,
    canceller: Box<dyn EchoCanceller>,
    recorder: Option<AecRecorder>,
}

impl EchoCancellationStage {
    pub fn new(canceller: Box<dyn EchoCanceller>) -> Self {
        Self {
            capture: ByteQueue::default(),
            reference: ByteQueue::default(),
            canceller,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: AecRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// FDAF canceller, plus a recorder when `dump_dir` is set. A recorder
    /// that cannot be created is logged and skipped.
    pub fn from_config(config: &AecConfig, format: AudioFormat) -> Result<Self> {
        let canceller = FdafCanceller::new(config.fft_size, config.step_size)?;
        let mut stage = Self::new(Box::new(canceller));
        if let Some(dir) = &config.dump_dir {
            match AecRecorder::create(dir, format.sample_rate) {
                Ok(recorder) => stage = stage.with_recorder(recorder),
                Err(err) => tracing::warn!("AEC recording disabled: {:#}", err),
            }
        }
        Ok(stage)
    }

    pub fn capture_handle(&self) -> CaptureHandle {
        CaptureHandle(self.capture.clone())
    }

    pub fn reference_handle(&self) -> ReferenceHandle {
        ReferenceHandle(self.reference.clone())
    }

    pub fn append_capture(&self, bytes: &[u8]) {
        self.capture.lock().extend(bytes);
    }

    pub fn append_reference(&self, bytes: &[u8]) {
        self.reference.lock().extend(bytes);
    }

    pub fn pending_capture(&self) -> usize {
        self.capture.lock().len()
    }

    pub fn pending_reference(&self) -> usize {
        self.reference.lock().len()
    }

    /// Clean up to `max_len` bytes of queued capture audio.
    ///
    /// Takes `n = min(queued capture, max_len)` bytes rounded down to whole
    /// samples, pairs them with as much reference audio as is queued (up to
    /// `n`, zero-padded), and returns exactly `n` cleaned bytes. Empty when no
    /// whole sample is queued.
    pub fn read_processed(&mut self, max_len: usize) -> Vec<u8> {
        let capture: Vec<u8> = {
            let mut queue = self.capture.lock();
            let n = queue.len().min(max_len) & !1;
            if n == 0 {
                return Vec::new();
            }
            queue.drain(..n).collect()
        };
        let mut reference: Vec<u8> = {
            let mut queue = self.reference.lock();
            let take = queue.len().min(capture.len());
            queue.drain(..take).collect()
        };
        reference.resize(capture.len(), 0);

        let capture = bytes_to_samples(&capture);
        let reference = bytes_to_samples(&reference);
        let processed = self.process(&reference, &capture);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(&capture, &reference, &processed);
        }
        samples_to_bytes(&processed)
    }

    fn process(&mut self, reference: &[i16], capture: &[i16]) -> Vec<i16> {
        let frame = self.canceller.frame_size().max(1);
        let mut output = Vec::with_capacity(capture.len());
        let mut offset = 0;
        while offset + frame <= capture.len() {
            let mic = to_f32(&capture[offset..offset + frame]);
            let echo = to_f32(&reference[offset..offset + frame]);
            let start = output.len();
            self.canceller.process(&echo, &mic, &mut output);
            if output.len() != start + frame {
                tracing::warn!(
                    "Echo canceller returned {} samples for a {} sample frame",
                    output.len() - start,
                    frame
                );
                output.truncate(start);
                output.extend(mic);
            }
            offset += frame;
        }
        let mut samples: Vec<i16> = output.into_iter().map(f32_to_i16).collect();
        // Tail shorter than a sub-frame passes through untouched.
        samples.extend_from_slice(&capture[offset..]);
        samples
    }
}

fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| *s as f32 / 32768.0).collect()
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
