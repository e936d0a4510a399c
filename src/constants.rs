/// Compile-time floors for audio processing, calibration and scheduling.
/// Environment-tuned values (hangover, sensitivity, thresholds) live in
/// the YAML configuration instead - see `config.rs`.

pub mod audio {
    /// Sample rate the whole pipeline operates at (Whisper's native rate)
    pub const SAMPLE_RATE: u32 = 16000;

    /// Minimum audio samples required for a Whisper call (1.5 seconds)
    /// Shorter segments are zero-padded up to this before submission
    pub const MIN_WHISPER_SAMPLES: usize = 24000;

    /// Samples at or above this magnitude count as clipped when deciding
    /// whether a segment is degenerate
    pub const CLIP_LEVEL: f32 = 0.999;
}

pub mod calibration {
    /// Minimum number of ambient frames required for a valid calibration.
    /// Fewer than this (device stalled, unplugged) fails calibration.
    pub const MIN_CALIBRATION_FRAMES: usize = 10;

    /// Floor for the derived speech threshold so a dead-silent room
    /// (variance ~0) still needs real signal to trigger the VAD
    pub const SPEECH_THRESHOLD_FLOOR: f32 = 0.004;

    /// Floor for the derived variation threshold
    pub const VARIATION_THRESHOLD_FLOOR: f32 = 0.001;
}

pub mod processing {
    /// Maximum frames pulled from the ring buffer per processing pass
    pub const MAX_DRAIN_FRAMES: usize = 64;

    /// Idle sleep between processing passes when no frames are waiting
    pub const POLL_INTERVAL_MS: u64 = 10;

    /// Emit an AudioLevel event at most once per this many frames
    pub const AUDIO_LEVEL_EVERY_FRAMES: u64 = 10;
}
