use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use voxbridge_session::VirtualSpeaker;

use super::{AudioFormat, AudioOutput, CallbackFlow};
use crate::aec::ReferenceHandle;
use crate::gate::ReadinessGate;

/// Moves remote call audio to the local speaker.
///
/// Every frame handed to the device is also fed to the echo canceller's
/// reference stream when one is attached, so the canceller sees exactly what
/// the speaker played.
pub struct AudioPlaybackConsumer {
    format: AudioFormat,
    speaker: Box<dyn VirtualSpeaker>,
    reference: Option<ReferenceHandle>,
    gate: Arc<ReadinessGate>,
    quit: Arc<AtomicBool>,
    // Tail of the last frame not yet consumed by a device callback.
    leftover: Vec<u8>,
    frames: u64,
    underruns: u64,
}

impl AudioPlaybackConsumer {
    pub fn new(
        format: AudioFormat,
        speaker: Box<dyn VirtualSpeaker>,
        reference: Option<ReferenceHandle>,
        gate: Arc<ReadinessGate>,
        quit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            format,
            speaker,
            reference,
            gate,
            quit,
            leftover: Vec::new(),
            frames: 0,
            underruns: 0,
        }
    }

    /// Blocking realization: wait for the gate, then pull and play one frame
    /// per iteration until the quit flag is set. Returns the number of frames
    /// played.
    pub fn run(mut self, mut output: Box<dyn AudioOutput>) -> u64 {
        if !self.gate.wait() {
            tracing::warn!("Unable to receive audio: session not ready");
            return 0;
        }
        tracing::info!("Playback task started");
        while !self.quit.load(Ordering::Acquire) {
            let frame = self.next_frame();
            if let Err(err) = output.write_frame(&frame) {
                tracing::error!("Failed to write to output device: {}", err);
                break;
            }
        }
        tracing::info!(
            "Playback task ended after {} frames ({} underruns)",
            self.frames,
            self.underruns
        );
        self.frames
    }

    /// Callback realization: fill `out` for the device. Silence is written
    /// until the gate releases.
    pub fn on_output(&mut self, out: &mut [u8]) -> CallbackFlow {
        if self.quit.load(Ordering::Acquire) {
            out.fill(0);
            return CallbackFlow::Stop;
        }
        match self.gate.poll() {
            Some(true) => {}
            Some(false) => {
                out.fill(0);
                return CallbackFlow::Stop;
            }
            None => {
                out.fill(0);
                return CallbackFlow::Continue;
            }
        }
        let mut written = 0;
        while written < out.len() {
            if self.leftover.is_empty() {
                let frame = self.next_frame();
                self.leftover = frame;
            }
            let n = (out.len() - written).min(self.leftover.len());
            out[written..written + n].copy_from_slice(&self.leftover[..n]);
            self.leftover.drain(..n);
            written += n;
        }
        CallbackFlow::Continue
    }

    /// Pull one frame from the virtual speaker. A short or failed read means
    /// no remote audio yet and is replaced by a full frame of silence.
    fn next_frame(&mut self) -> Vec<u8> {
        let frame_bytes = self.format.frame_bytes();
        let mut frame = match self.speaker.read_frames(self.format.frame_size) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!("Failed to read from virtual speaker: {}", err);
                Vec::new()
            }
        };
        if frame.len() < frame_bytes {
            self.underruns += 1;
            frame = self.format.silence();
        }
        frame.truncate(frame_bytes);
        if let Some(reference) = &self.reference {
            reference.append(&frame);
        }
        self.frames += 1;
        if self.frames % 100 == 0 {
            tracing::debug!(
                "Played {} audio frames ({} underruns)",
                self.frames,
                self.underruns
            );
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use voxbridge_session::SessionError;

    use super::*;
    use crate::Result;

    struct QueuedSpeaker(VecDeque<Vec<u8>>);

    impl VirtualSpeaker for QueuedSpeaker {
        fn name(&self) -> &str {
            "test-speaker"
        }

        fn read_frames(&mut self, _frame_count: usize) -> std::result::Result<Vec<u8>, SessionError> {
            self.0.pop_front().ok_or(SessionError::NotConnected)
        }
    }

    /// Records frames and sets quit after `limit` writes.
    struct CountingOutput {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        limit: usize,
        quit: Arc<AtomicBool>,
    }

    impl AudioOutput for CountingOutput {
        fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
            let mut frames = self.frames.lock();
            frames.push(frame.to_vec());
            if frames.len() >= self.limit {
                self.quit.store(true, Ordering::Release);
            }
            Ok(())
        }
    }

    fn ready_gate() -> Arc<ReadinessGate> {
        let gate = Arc::new(ReadinessGate::new());
        gate.signal_joined();
        gate.signal_inputs_configured();
        gate
    }

    #[test]
    fn short_and_failed_reads_become_silence() {
        let quit = Arc::new(AtomicBool::new(false));
        let speaker = QueuedSpeaker(VecDeque::from([vec![5u8; 1280], vec![7u8; 100]]));
        let consumer = AudioPlaybackConsumer::new(
            AudioFormat::default(),
            Box::new(speaker),
            None,
            ready_gate(),
            quit.clone(),
        );
        let frames = Arc::new(Mutex::new(Vec::new()));
        let output = CountingOutput {
            frames: frames.clone(),
            limit: 3,
            quit,
        };
        assert_eq!(consumer.run(Box::new(output)), 3);
        let frames = frames.lock();
        assert!(frames.iter().all(|f| f.len() == 1280));
        assert!(frames[0].iter().all(|b| *b == 5));
        // A partial read is dropped, not played.
        assert!(frames[1].iter().all(|b| *b == 0));
        // The speaker has run dry and errors from here on.
        assert!(frames[2].iter().all(|b| *b == 0));
    }

    #[test]
    fn failed_gate_plays_nothing() {
        let gate = Arc::new(ReadinessGate::new());
        gate.signal_failed();
        let quit = Arc::new(AtomicBool::new(false));
        let consumer = AudioPlaybackConsumer::new(
            AudioFormat::default(),
            Box::new(QueuedSpeaker(VecDeque::new())),
            None,
            gate,
            quit.clone(),
        );
        let frames = Arc::new(Mutex::new(Vec::new()));
        let output = CountingOutput {
            frames: frames.clone(),
            limit: 1,
            quit,
        };
        assert_eq!(consumer.run(Box::new(output)), 0);
        assert!(frames.lock().is_empty());
    }

    #[test]
    fn callback_writes_silence_until_ready() {
        let gate = Arc::new(ReadinessGate::new());
        let speaker = QueuedSpeaker(VecDeque::from([vec![3u8; 1280]]));
        let mut consumer = AudioPlaybackConsumer::new(
            AudioFormat::default(),
            Box::new(speaker),
            None,
            gate.clone(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut out = vec![9u8; 1280];
        assert_eq!(consumer.on_output(&mut out), CallbackFlow::Continue);
        assert!(out.iter().all(|b| *b == 0));

        gate.signal_joined();
        gate.signal_inputs_configured();
        assert_eq!(consumer.on_output(&mut out), CallbackFlow::Continue);
        assert!(out.iter().all(|b| *b == 3));
    }

    #[test]
    fn callback_splits_frames_across_device_buffers() {
        let speaker = QueuedSpeaker(VecDeque::from([vec![1u8; 1280], vec![2u8; 1280]]));
        let mut consumer = AudioPlaybackConsumer::new(
            AudioFormat::default(),
            Box::new(speaker),
            None,
            ready_gate(),
            Arc::new(AtomicBool::new(false)),
        );
        let mut out = vec![0u8; 1000];
        consumer.on_output(&mut out);
        assert!(out.iter().all(|b| *b == 1));
        consumer.on_output(&mut out);
        assert!(out[..280].iter().all(|b| *b == 1));
        assert!(out[280..].iter().all(|b| *b == 2));
    }
}
