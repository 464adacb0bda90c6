use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

type Writer = WavWriter<BufWriter<File>>;

struct Tracks {
    capture: Writer,
    reference: Writer,
    processed: Writer,
}

/// Dumps raw capture, raw reference and cleaned output as mono 16-bit WAV
/// files for offline inspection of the canceller.
///
/// Failures never reach the audio path: the first one is logged and the
/// recorder goes quiet for the rest of the call.
pub struct AecRecorder {
    tracks: Option<Tracks>,
}

impl AecRecorder {
    pub fn create(dir: &Path, sample_rate: u32) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create AEC dump directory {}", dir.display()))?;
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let open = |name: &str| {
            let path = dir.join(name);
            WavWriter::create(&path, spec)
                .with_context(|| format!("Failed to create {}", path.display()))
        };
        tracing::info!("Recording AEC streams to {}", dir.display());
        Ok(Self {
            tracks: Some(Tracks {
                capture: open("capture.wav")?,
                reference: open("reference.wav")?,
                processed: open("processed.wav")?,
            }),
        })
    }

    pub fn is_active(&self) -> bool {
        self.tracks.is_some()
    }

    pub fn record(&mut self, capture: &[i16], reference: &[i16], processed: &[i16]) {
        let Some(tracks) = self.tracks.as_mut() else {
            return;
        };
        let result = write_all(&mut tracks.capture, capture)
            .and_then(|_| write_all(&mut tracks.reference, reference))
            .and_then(|_| write_all(&mut tracks.processed, processed));
        if let Err(err) = result {
            tracing::warn!("Disabling AEC recording after write error: {:#}", err);
            self.tracks = None;
        }
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(tracks) = self.tracks.take() {
            tracks.capture.finalize()?;
            tracks.reference.finalize()?;
            tracks.processed.finalize()?;
        }
        Ok(())
    }
}

impl Drop for AecRecorder {
    fn drop(&mut self) {
        if let Err(err) = self.finalize() {
            tracing::warn!("Failed to finalize AEC recording: {}", err);
        }
    }
}

fn write_all(writer: &mut Writer, samples: &[i16]) -> Result<()> {
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    Ok(())
}
