use std::collections::VecDeque;

use crate::calibration::ProfileHandle;
use crate::frame::AudioFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Speech,
    Silence,
}

/// Energy-based voice activity detector with a variation criterion.
///
/// A frame is speech only when its RMS energy clears the calibrated
/// speech threshold AND the energy spread over a short rolling window
/// clears the variation threshold. Steady-state noise (fans, hum) can be
/// loud but has speech-unlike, near-constant energy, so the second
/// criterion rejects it. O(1) amortized per frame.
pub struct VoiceActivityDetector {
    profile: ProfileHandle,
    history: VecDeque<f32>,
    window_frames: usize,
}

impl VoiceActivityDetector {
    pub fn new(profile: ProfileHandle, window_frames: usize) -> Self {
        VoiceActivityDetector {
            profile,
            history: VecDeque::with_capacity(window_frames),
            window_frames,
        }
    }

    pub fn classify(&mut self, frame: &AudioFrame) -> FrameClass {
        // Snapshot once per frame; a concurrent re-calibration swaps the
        // profile between frames, never within one
        let profile = self.profile.load();

        if self.history.len() == self.window_frames {
            self.history.pop_front();
        }
        self.history.push_back(frame.energy);

        if frame.energy <= profile.speech_threshold {
            return FrameClass::Silence;
        }

        let variation = self.short_term_variation();
        if variation > profile.variation_threshold {
            FrameClass::Speech
        } else {
            FrameClass::Silence
        }
    }

    /// Peak-to-trough spread of recent frame energies
    fn short_term_variation(&self) -> f32 {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &energy in &self.history {
            min = min.min(energy);
            max = max.max(energy);
        }
        if self.history.is_empty() {
            0.0
        } else {
            max - min
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationProfile, ProfileHandle};
    use std::time::Instant;

    fn test_profile(speech_threshold: f32, variation_threshold: f32) -> ProfileHandle {
        ProfileHandle::new(CalibrationProfile {
            noise_floor_energy: speech_threshold / 3.0,
            speech_threshold,
            variation_threshold,
            calibrated_at: Instant::now(),
        })
    }

    fn frame(level: f32) -> AudioFrame {
        AudioFrame::new(vec![level; 480], Instant::now())
    }

    #[test]
    fn silence_never_classified_as_speech() {
        let mut vad = VoiceActivityDetector::new(test_profile(0.02, 0.005), 8);
        for _ in 0..200 {
            assert_eq!(vad.classify(&frame(0.001)), FrameClass::Silence);
        }
    }

    #[test]
    fn noise_at_the_floor_never_classified_as_speech() {
        let mut vad = VoiceActivityDetector::new(test_profile(0.02, 0.005), 8);
        // Ambient jitter just below the speech threshold
        for i in 0..200 {
            let level = 0.015 + if i % 2 == 0 { 0.002 } else { -0.002 };
            assert_eq!(vad.classify(&frame(level)), FrameClass::Silence);
        }
    }

    #[test]
    fn steady_loud_hum_rejected_by_variation_criterion() {
        let mut vad = VoiceActivityDetector::new(test_profile(0.02, 0.005), 8);
        // A fan well above the energy threshold but dead flat
        for _ in 0..100 {
            assert_eq!(vad.classify(&frame(0.08)), FrameClass::Silence);
        }
    }

    #[test]
    fn loud_varying_signal_is_speech() {
        let mut vad = VoiceActivityDetector::new(test_profile(0.02, 0.005), 8);
        // Prime the window with quiet ambience, then speak
        for _ in 0..8 {
            vad.classify(&frame(0.005));
        }
        let mut saw_speech = false;
        for i in 0..20 {
            let level = if i % 2 == 0 { 0.3 } else { 0.12 };
            if vad.classify(&frame(level)) == FrameClass::Speech {
                saw_speech = true;
            }
        }
        assert!(saw_speech);
    }

    #[test]
    fn recalibration_applies_between_frames() {
        let profile = test_profile(0.02, 0.005);
        let mut vad = VoiceActivityDetector::new(profile.clone(), 8);

        for _ in 0..8 {
            vad.classify(&frame(0.005));
        }
        assert_eq!(vad.classify(&frame(0.3)), FrameClass::Speech);

        // Raise the bar past the signal; the same input is now silence
        profile.store(CalibrationProfile {
            noise_floor_energy: 0.2,
            speech_threshold: 0.5,
            variation_threshold: 0.005,
            calibrated_at: Instant::now(),
        });
        assert_eq!(vad.classify(&frame(0.3)), FrameClass::Silence);
    }
}
