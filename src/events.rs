use std::sync::mpsc::{channel, Receiver, Sender};

/// Lifecycle and diagnostic notifications for observers (UI, logging).
///
/// Delivery is non-blocking and read-only: events are fire-and-forget,
/// and a dropped receiver silently disables the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Ambient calibration finished; thresholds are active
    CalibrationDone {
        noise_floor: f32,
        speech_threshold: f32,
    },
    /// A speech segment passed assembly and was handed to the scheduler
    SegmentFinalized { duration_ms: u64, frames: usize },
    /// A transcript passed the hallucination filter and was emitted
    TranscriptAccepted { text: String },
    /// A transcript was suppressed; the segment is not retried
    TranscriptRejected { text: String, reason: String },
    /// The ring buffer discarded its oldest frames; value is the running total
    Overflow { dropped_frames: u64 },
    /// A pending segment was dropped in favor of fresher audio
    BacklogDropped,
    /// Periodic input level report (RMS of a recent frame)
    AudioLevel { rms: f32 },
    /// An inference call failed; the segment was dropped
    EngineUnavailable { error: String },
    /// The capture stream reported an error; the session is halting
    DeviceFailed { error: String },
    /// The session has fully torn down
    Stopped,
}

/// Cloneable sending half of the observer channel.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<PipelineEvent>,
}

impl EventSender {
    /// Send an event without blocking. Errors (receiver gone) are ignored -
    /// observers are optional.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

pub fn event_channel() -> (EventSender, Receiver<PipelineEvent>) {
    let (tx, rx) = channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (tx, rx) = event_channel();
        drop(rx);
        tx.emit(PipelineEvent::BacklogDropped); // must not panic
    }

    #[test]
    fn events_arrive_in_order() {
        let (tx, rx) = event_channel();
        tx.emit(PipelineEvent::BacklogDropped);
        tx.emit(PipelineEvent::Stopped);
        assert_eq!(rx.recv().unwrap(), PipelineEvent::BacklogDropped);
        assert_eq!(rx.recv().unwrap(), PipelineEvent::Stopped);
    }
}
