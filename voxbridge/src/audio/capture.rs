use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use voxbridge_session::VirtualMicrophone;

use super::{AudioFormat, AudioInput, CallbackFlow};
use crate::aec::CaptureHandle;
use crate::gate::ReadinessGate;

/// Where captured frames go.
pub enum CaptureSink {
    /// Straight to the session's virtual microphone.
    Microphone(Box<dyn VirtualMicrophone>),
    /// Into the echo canceller; the AEC forwarder sends the cleaned audio on.
    EchoCanceller(CaptureHandle),
}

impl CaptureSink {
    fn forward(&mut self, frame: &[u8]) {
        match self {
            CaptureSink::Microphone(microphone) => {
                if let Err(err) = microphone.write_frames(frame) {
                    tracing::warn!("Failed to write frame to virtual microphone: {}", err);
                }
            }
            CaptureSink::EchoCanceller(capture) => capture.append(frame),
        }
    }
}

/// Moves local microphone audio into the call.
pub struct AudioCaptureProducer {
    format: AudioFormat,
    sink: CaptureSink,
    gate: Arc<ReadinessGate>,
    quit: Arc<AtomicBool>,
    join_timeout: Option<Duration>,
    pending: Vec<u8>,
    waiting_since: Option<Instant>,
    frames: u64,
}

impl AudioCaptureProducer {
    pub fn new(
        format: AudioFormat,
        sink: CaptureSink,
        gate: Arc<ReadinessGate>,
        quit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            format,
            sink,
            gate,
            quit,
            join_timeout: None,
            pending: Vec::with_capacity(format.frame_bytes() * 2),
            waiting_since: None,
            frames: 0,
        }
    }

    /// Give up on the session if the gate has not released within `timeout`.
    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    /// Blocking realization: wait for the gate, then read and forward one
    /// frame per iteration until the quit flag is set. Returns the number of
    /// frames forwarded.
    pub fn run(mut self, mut input: Box<dyn AudioInput>) -> u64 {
        if !self.gate.wait_or_fail(self.join_timeout) {
            tracing::warn!("Unable to send audio: session not ready");
            return 0;
        }
        tracing::info!("Capture task started");
        let mut buffer = self.format.silence();
        while !self.quit.load(Ordering::Acquire) {
            match input.read_frame(&mut buffer) {
                Ok(read) if read == buffer.len() => self.forward(&buffer),
                // Not a full frame yet (or the device overflowed); retry.
                Ok(_) => {}
                Err(err) => {
                    tracing::error!("Failed to read from input device: {}", err);
                    break;
                }
            }
        }
        tracing::info!("Capture task ended after {} frames", self.frames);
        self.frames
    }

    /// Callback realization: called by the audio subsystem with whatever
    /// the device produced. Never blocks.
    pub fn on_input(&mut self, data: &[u8]) -> CallbackFlow {
        if self.quit.load(Ordering::Acquire) {
            return CallbackFlow::Stop;
        }
        match self.gate.poll() {
            Some(true) => {}
            Some(false) => return CallbackFlow::Stop,
            None => {
                self.check_join_deadline();
                return CallbackFlow::Continue;
            }
        }
        self.pending.extend_from_slice(data);
        let frame_bytes = self.format.frame_bytes();
        while self.pending.len() >= frame_bytes {
            let frame: Vec<u8> = self.pending.drain(..frame_bytes).collect();
            self.forward(&frame);
        }
        CallbackFlow::Continue
    }

    fn forward(&mut self, frame: &[u8]) {
        self.sink.forward(frame);
        self.frames += 1;
        if self.frames % 100 == 0 {
            tracing::debug!("Captured {} audio frames", self.frames);
        }
    }

    fn check_join_deadline(&mut self) {
        let Some(timeout) = self.join_timeout else {
            return;
        };
        let since = *self.waiting_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= timeout {
            tracing::warn!(?timeout, "Session not ready in time, failing readiness gate");
            self.gate.signal_failed();
        }
    }
}
