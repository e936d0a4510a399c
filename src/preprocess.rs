use crate::constants::audio::CLIP_LEVEL;

/// Deterministic segment conditioning before inference: first-order
/// pre-emphasis (boosts the high-frequency band where consonants live)
/// followed by peak normalization. Pure function of the input samples.
pub struct Preprocessor {
    /// Pre-emphasis coefficient, y[n] = x[n] - a * x[n-1]
    coefficient: f32,
    /// Peak amplitude after normalization
    target_peak: f32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Preprocessor {
            coefficient: 0.97,
            target_peak: 0.95,
        }
    }
}

impl Preprocessor {
    pub fn new(coefficient: f32, target_peak: f32) -> Self {
        Preprocessor {
            coefficient,
            target_peak,
        }
    }

    /// Filter and normalize a finalized segment's samples.
    ///
    /// Degenerate input (all-zero, or dominated by clipped samples) is
    /// returned unmodified - dividing by a vanishing or meaningless peak
    /// would only manufacture garbage.
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        if self.is_degenerate(samples) {
            return samples.to_vec();
        }

        let mut out = Vec::with_capacity(samples.len());
        let mut prev = 0.0f32;
        for &sample in samples {
            out.push(sample - self.coefficient * prev);
            prev = sample;
        }

        let peak = out.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        if peak > 0.0 {
            let gain = self.target_peak / peak;
            for sample in &mut out {
                *sample *= gain;
            }
        }

        out
    }

    fn is_degenerate(&self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return true;
        }
        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        if peak < 1e-6 {
            return true; // all-zero
        }
        let clipped = samples.iter().filter(|s| s.abs() >= CLIP_LEVEL).count();
        clipped * 2 > samples.len()
    }
}
