use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use voxbridge_session::VirtualMicrophone;

use super::EchoCancellationStage;
use crate::audio::AudioFormat;
use crate::gate::ReadinessGate;

const IDLE_INTERVAL: Duration = Duration::from_millis(5);

/// Drains cleaned frames from the echo-cancellation stage into the session's
/// virtual microphone.
pub struct AecForwarder {
    stage: EchoCancellationStage,
    microphone: Box<dyn VirtualMicrophone>,
    gate: Arc<ReadinessGate>,
    quit: Arc<AtomicBool>,
    format: AudioFormat,
    join_timeout: Option<Duration>,
}

impl AecForwarder {
    pub fn new(
        stage: EchoCancellationStage,
        microphone: Box<dyn VirtualMicrophone>,
        gate: Arc<ReadinessGate>,
        quit: Arc<AtomicBool>,
        format: AudioFormat,
    ) -> Self {
        Self {
            stage,
            microphone,
            gate,
            quit,
            format,
            join_timeout: None,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Returns the number of frames forwarded.
    pub fn run(mut self) -> u64 {
        if !self.gate.wait_or_fail(self.join_timeout) {
            tracing::warn!("Unable to forward processed audio: session not ready");
            return 0;
        }
        tracing::info!("AEC forwarder started");
        let frame_bytes = self.format.frame_bytes();
        let mut frames = 0u64;
        while !self.quit.load(Ordering::Acquire) {
            if self.stage.pending_capture() < frame_bytes {
                thread::sleep(IDLE_INTERVAL);
                continue;
            }
            let processed = self.stage.read_processed(frame_bytes);
            if let Err(err) = self.microphone.write_frames(&processed) {
                tracing::warn!("Failed to write processed frame to virtual microphone: {}", err);
            }
            frames += 1;
            if frames % 100 == 0 {
                tracing::debug!("Forwarded {} processed frames", frames);
            }
        }
        tracing::info!("AEC forwarder ended after {} frames", frames);
        frames
    }
}
