use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use voxbridge_session::{SessionError, VirtualMicrophone, VirtualSpeaker};

/// Microphone that records every `write_frames` call.
pub struct LoopbackMicrophone {
    name: String,
    channels: u16,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl LoopbackMicrophone {
    pub(crate) fn new(name: &str, channels: u16, writes: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        Self {
            name: name.to_string(),
            channels,
            writes,
        }
    }
}

impl VirtualMicrophone for LoopbackMicrophone {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_frames(&mut self, frames: &[u8]) -> Result<usize, SessionError> {
        let frame_bytes = 2 * self.channels as usize;
        if frames.len() % frame_bytes != 0 {
            return Err(SessionError::Device(format!(
                "buffer of {} bytes is not a whole number of frames",
                frames.len()
            )));
        }
        self.writes.lock().push(frames.to_vec());
        tracing::trace!(device = %self.name, bytes = frames.len(), "Microphone write");
        Ok(frames.len() / frame_bytes)
    }
}

/// Speaker that hands out whatever audio the test queued for it.
pub struct LoopbackSpeaker {
    name: String,
    channels: u16,
    queue: Arc<Mutex<VecDeque<u8>>>,
}

impl LoopbackSpeaker {
    pub(crate) fn new(name: &str, channels: u16, queue: Arc<Mutex<VecDeque<u8>>>) -> Self {
        Self {
            name: name.to_string(),
            channels,
            queue,
        }
    }
}

impl VirtualSpeaker for LoopbackSpeaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frames(&mut self, frame_count: usize) -> Result<Vec<u8>, SessionError> {
        let frame_bytes = 2 * self.channels as usize;
        let mut queue = self.queue.lock();
        // Only whole frames are handed out, like the real runtime.
        let available = queue.len() / frame_bytes;
        let take = available.min(frame_count) * frame_bytes;
        Ok(queue.drain(..take).collect())
    }
}
