use thiserror::Error;

/// Pipeline error taxonomy.
///
/// Frame-level and segment-level failures never surface here - they are
/// reported through observer events and the pipeline keeps listening.
/// Only device and calibration failures halt a session.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Not enough ambient audio was captured to derive thresholds.
    /// Fatal to `start()`, retryable by calling `start()` again.
    #[error("calibration failed: {0}")]
    Calibration(String),

    /// Audio device I/O failure. Capture halts; an explicit `start()`
    /// is required to retry.
    #[error("audio device error: {0}")]
    Device(String),

    /// The inference engine could not be reached or loaded. The affected
    /// segment is dropped and the pipeline continues listening.
    #[error("transcription engine unavailable: {0}")]
    ModelUnavailable(String),

    /// Lifecycle misuse (start while running, pause while idle, ...)
    #[error("invalid pipeline state: {0}")]
    InvalidState(&'static str),
}
