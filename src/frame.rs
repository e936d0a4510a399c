use std::time::Instant;

/// One fixed-length window of mono samples with its short-term energy.
/// Immutable once produced by the capture stage.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub timestamp: Instant,
    /// RMS energy, computed once at construction
    pub energy: f32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, timestamp: Instant) -> Self {
        let energy = rms(&samples);
        AudioFrame {
            samples,
            timestamp,
            energy,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration at the given sample rate
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1000) / sample_rate as u64
    }
}

/// Root-mean-square energy of a sample slice
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
