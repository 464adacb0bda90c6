use crate::SessionError;

/// Virtual microphone exposed by the session: bytes written here are what
/// the remote participants hear.
pub trait VirtualMicrophone: Send {
    fn name(&self) -> &str;

    /// Write interleaved 16-bit little-endian PCM. Returns the number of
    /// frames (samples per channel) accepted.
    fn write_frames(&mut self, frames: &[u8]) -> Result<usize, SessionError>;
}

/// Virtual speaker exposed by the session: remote audio is read from here.
pub trait VirtualSpeaker: Send {
    fn name(&self) -> &str;

    /// Read up to `frame_count` frames of 16-bit little-endian PCM. An empty or
    /// short buffer means no remote audio was available yet.
    fn read_frames(&mut self, frame_count: usize) -> Result<Vec<u8>, SessionError>;
}
