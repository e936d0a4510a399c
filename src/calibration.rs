use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::constants::calibration::{
    MIN_CALIBRATION_FRAMES, SPEECH_THRESHOLD_FLOOR, VARIATION_THRESHOLD_FLOOR,
};
use crate::error::PipelineError;
use crate::frame::AudioFrame;
use crate::ring_buffer::FrameRing;

/// Thresholds derived from a one-shot ambient noise measurement.
/// Read-only after creation; replaced wholesale on re-calibration.
#[derive(Debug, Clone)]
pub struct CalibrationProfile {
    /// Mean RMS energy of the ambient frames
    pub noise_floor_energy: f32,
    /// Frame energy above this may be speech
    pub speech_threshold: f32,
    /// Short-term energy variation required on top of raw energy,
    /// separating speech from steady-state noise (fans, hum)
    pub variation_threshold: f32,
    pub calibrated_at: Instant,
}

/// Atomic snapshot handle for the active profile.
///
/// Readers clone the inner `Arc` under a short lock and then work from a
/// consistent snapshot - a concurrent re-calibration never produces torn
/// reads mid-segment.
#[derive(Clone)]
pub struct ProfileHandle {
    inner: Arc<Mutex<Arc<CalibrationProfile>>>,
}

impl ProfileHandle {
    pub fn new(profile: CalibrationProfile) -> Self {
        ProfileHandle {
            inner: Arc::new(Mutex::new(Arc::new(profile))),
        }
    }

    /// Current profile snapshot
    pub fn load(&self) -> Arc<CalibrationProfile> {
        self.inner
            .lock()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Atomically replace the active profile
    pub fn store(&self, profile: CalibrationProfile) {
        match self.inner.lock() {
            Ok(mut guard) => *guard = Arc::new(profile),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(profile),
        }
    }
}

/// One-shot ambient-noise measurement producing adaptive VAD thresholds.
pub struct Calibrator {
    /// Sensitivity multiplier k: speech_threshold = noise_floor + k * stddev
    sensitivity: f32,
    /// Fraction of the energy stddev used as the variation threshold
    variation_factor: f32,
}

impl Calibrator {
    pub fn new(sensitivity: f32, variation_factor: f32) -> Self {
        Calibrator {
            sensitivity,
            variation_factor,
        }
    }

    /// Derive a profile from already-collected ambient frames.
    /// Fails if too few frames were captured (device stalled or unplugged).
    pub fn from_frames(&self, frames: &[AudioFrame]) -> Result<CalibrationProfile, PipelineError> {
        if frames.len() < MIN_CALIBRATION_FRAMES {
            return Err(PipelineError::Calibration(format!(
                "captured {} ambient frames, need at least {}",
                frames.len(),
                MIN_CALIBRATION_FRAMES
            )));
        }

        let energies: Vec<f32> = frames.iter().map(|f| f.energy).collect();
        let mean = energies.iter().sum::<f32>() / energies.len() as f32;
        let variance =
            energies.iter().map(|e| (e - mean).powi(2)).sum::<f32>() / energies.len() as f32;
        let stddev = variance.sqrt();

        let speech_threshold = (mean + self.sensitivity * stddev).max(SPEECH_THRESHOLD_FLOOR);
        let variation_threshold =
            (stddev * self.variation_factor).max(VARIATION_THRESHOLD_FLOOR);

        Ok(CalibrationProfile {
            noise_floor_energy: mean,
            speech_threshold,
            variation_threshold,
            calibrated_at: Instant::now(),
        })
    }

    /// Collect ambient frames from the ring for `duration`, assuming no
    /// speech, then derive a profile. Blocks the calling thread for the
    /// warm-up duration.
    pub fn run(
        &self,
        ring: &FrameRing,
        duration: Duration,
    ) -> Result<CalibrationProfile, PipelineError> {
        let deadline = Instant::now() + duration;
        let mut frames = Vec::new();

        while Instant::now() < deadline {
            frames.extend(ring.drain(32));
            std::thread::sleep(Duration::from_millis(10));
        }
        frames.extend(ring.drain(32));

        self.from_frames(&frames)
    }
}
