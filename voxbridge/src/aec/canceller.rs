use crate::{Error, Result};

/// Stateful echo-cancellation transform over fixed-size sub-frames.
pub trait EchoCanceller: Send {
    /// Samples per sub-frame accepted by [`process`](Self::process).
    fn frame_size(&self) -> usize;

    /// Remove `reference` from `capture` and append the result to `output`.
    /// Both inputs are exactly `frame_size()` samples.
    fn process(&mut self, reference: &[f32], capture: &[f32], output: &mut Vec<f32>);
}

/// Frequency-domain adaptive filter from `fdaf-aec`.
pub struct FdafCanceller {
    filter: fdaf_aec::FdafAec,
    frame_size: usize,
}

impl FdafCanceller {
    pub fn new(fft_size: usize, step_size: f32) -> Result<Self> {
        if fft_size == 0 || !fft_size.is_power_of_two() {
            return Err(Error::Configuration(format!(
                "AEC fft_size must be a non-zero power of two, got {}",
                fft_size
            )));
        }
        Ok(Self {
            filter: fdaf_aec::FdafAec::new(fft_size, step_size),
            frame_size: fft_size / 2,
        })
    }
}

impl EchoCanceller for FdafCanceller {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn process(&mut self, reference: &[f32], capture: &[f32], output: &mut Vec<f32>) {
        let cleaned = self.filter.process(reference, capture);
        output.extend_from_slice(&cleaned);
    }
}
