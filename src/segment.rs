use std::time::Instant;

use crate::frame::AudioFrame;
use crate::vad::FrameClass;

/// One contiguous utterance assembled from classified frames.
/// Mutable only by the assembler; ownership transfers to the scheduler
/// once finalized.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    frames: Vec<AudioFrame>,
    pub start_time: Instant,
    pub end_time: Instant,
    pub peak_energy: f32,
    pub is_finalized: bool,
}

impl SpeechSegment {
    fn new(first: AudioFrame) -> Self {
        let start = first.timestamp;
        let peak = first.energy;
        SpeechSegment {
            start_time: start,
            end_time: start,
            peak_energy: peak,
            is_finalized: false,
            frames: vec![first],
        }
    }

    fn push(&mut self, frame: AudioFrame) {
        self.end_time = frame.timestamp;
        self.peak_energy = self.peak_energy.max(frame.energy);
        self.frames.push(frame);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }

    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        (self.sample_count() as u64 * 1000) / sample_rate as u64
    }

    /// Concatenate all frame samples into one contiguous buffer
    pub fn samples(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    Idle,
    Accumulating,
    /// Trailing silence being retained; counts silent frames seen so far
    Hangover(usize),
}

/// Accumulates contiguous speech frames into segments with hysteresis.
///
/// Idle -> Accumulating on the first speech frame. Silence moves to
/// Hangover, where silent frames are still appended (clipping trailing
/// phonemes sounds worse than carrying a little room tone); speech before
/// the countdown expires returns to Accumulating, expiry finalizes. A
/// maximum duration cap forces finalization mid-speech so worst-case
/// latency and memory stay bounded.
pub struct SegmentAssembler {
    state: AssemblerState,
    current: Option<SpeechSegment>,
    hangover_frames: usize,
    min_frames: usize,
    max_frames: usize,
}

impl SegmentAssembler {
    pub fn new(hangover_ms: u64, min_segment_ms: u64, max_segment_ms: u64, frame_ms: u64) -> Self {
        let to_frames = |ms: u64| ((ms + frame_ms - 1) / frame_ms).max(1) as usize;
        SegmentAssembler {
            state: AssemblerState::Idle,
            current: None,
            hangover_frames: to_frames(hangover_ms),
            min_frames: to_frames(min_segment_ms),
            max_frames: to_frames(max_segment_ms),
        }
    }

    /// Feed one classified frame. Returns a finalized segment when an
    /// utterance completes; sub-minimum segments are discarded as noise
    /// and never returned.
    pub fn offer(&mut self, frame: AudioFrame, class: FrameClass) -> Option<SpeechSegment> {
        match (self.state, class) {
            (AssemblerState::Idle, FrameClass::Speech) => {
                self.state = AssemblerState::Accumulating;
                self.current = Some(SpeechSegment::new(frame));
                self.cap_check()
            }
            (AssemblerState::Idle, FrameClass::Silence) => None,

            (AssemblerState::Accumulating, FrameClass::Speech) => {
                self.append(frame);
                self.cap_check()
            }
            (AssemblerState::Accumulating, FrameClass::Silence) => {
                self.append(frame);
                self.state = AssemblerState::Hangover(1);
                self.maybe_finalize_hangover(1)
            }

            (AssemblerState::Hangover(_), FrameClass::Speech) => {
                // Speaker resumed before the countdown ran out
                self.append(frame);
                self.state = AssemblerState::Accumulating;
                self.cap_check()
            }
            (AssemblerState::Hangover(count), FrameClass::Silence) => {
                self.append(frame);
                let count = count + 1;
                self.state = AssemblerState::Hangover(count);
                self.maybe_finalize_hangover(count)
            }
        }
    }

    /// Discard whatever is currently accumulating (used on stop)
    pub fn reset(&mut self) {
        self.state = AssemblerState::Idle;
        self.current = None;
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    fn append(&mut self, frame: AudioFrame) {
        if let Some(segment) = self.current.as_mut() {
            segment.push(frame);
        }
    }

    fn maybe_finalize_hangover(&mut self, silent_frames: usize) -> Option<SpeechSegment> {
        if silent_frames >= self.hangover_frames {
            self.finalize(silent_frames)
        } else {
            None
        }
    }

    fn cap_check(&mut self) -> Option<SpeechSegment> {
        let over_cap = self
            .current
            .as_ref()
            .map(|s| s.frame_count() >= self.max_frames)
            .unwrap_or(false);
        if over_cap {
            self.finalize(0)
        } else {
            None
        }
    }

    fn finalize(&mut self, trailing_silence: usize) -> Option<SpeechSegment> {
        self.state = AssemblerState::Idle;
        let mut segment = self.current.take()?;
        // The minimum is judged on the utterance itself, not the
        // retained hangover silence
        if segment.frame_count().saturating_sub(trailing_silence) < self.min_frames {
            return None;
        }
        segment.is_finalized = true;
        Some(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 30;

    fn assembler() -> SegmentAssembler {
        SegmentAssembler::new(400, 250, 15000, FRAME_MS)
    }

    fn speech() -> (AudioFrame, FrameClass) {
        (
            AudioFrame::new(vec![0.3; 480], Instant::now()),
            FrameClass::Speech,
        )
    }

    fn silence() -> (AudioFrame, FrameClass) {
        (
            AudioFrame::new(vec![0.001; 480], Instant::now()),
            FrameClass::Silence,
        )
    }

    fn feed(asm: &mut SegmentAssembler, items: Vec<(AudioFrame, FrameClass)>) -> Vec<SpeechSegment> {
        items
            .into_iter()
            .filter_map(|(frame, class)| asm.offer(frame, class))
            .collect()
    }

    #[test]
    fn one_second_of_speech_yields_exactly_one_segment() {
        let mut asm = assembler();
        let mut items: Vec<_> = (0..34).map(|_| speech()).collect(); // ~1s
        items.extend((0..20).map(|_| silence())); // past hangover

        let segments = feed(&mut asm, items);
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert!(segment.is_finalized);
        assert!(segment.duration_ms(16000) >= 1000);
    }

    #[test]
    fn sub_minimum_blip_is_discarded() {
        let mut asm = assembler();
        // 3 frames = 90ms of "speech", below the 250ms minimum
        let mut items: Vec<_> = (0..3).map(|_| speech()).collect();
        items.extend((0..20).map(|_| silence()));

        assert!(feed(&mut asm, items).is_empty());
        assert!(!asm.is_active());
    }

    #[test]
    fn speech_resuming_in_hangover_extends_the_segment() {
        let mut asm = assembler();
        let mut items: Vec<_> = (0..10).map(|_| speech()).collect();
        // Pause shorter than the 400ms hangover (14 frames)
        items.extend((0..5).map(|_| silence()));
        items.extend((0..10).map(|_| speech()));
        items.extend((0..20).map(|_| silence()));

        let segments = feed(&mut asm, items);
        assert_eq!(segments.len(), 1);
        // Both bursts plus retained silence live in one segment
        assert!(segments[0].frame_count() > 25);
    }

    #[test]
    fn hangover_silence_is_retained_in_the_segment() {
        let mut asm = assembler();
        let mut items: Vec<_> = (0..10).map(|_| speech()).collect();
        items.extend((0..20).map(|_| silence()));

        let segments = feed(&mut asm, items);
        assert_eq!(segments.len(), 1);
        let hangover_frames = (400 + FRAME_MS - 1) / FRAME_MS;
        assert_eq!(
            segments[0].frame_count(),
            10 + hangover_frames as usize
        );
    }

    #[test]
    fn max_duration_cap_forces_finalization_without_silence() {
        let mut asm = SegmentAssembler::new(400, 250, 3000, FRAME_MS);
        let items: Vec<_> = (0..250).map(|_| speech()).collect(); // 7.5s nonstop

        let segments = feed(&mut asm, items);
        assert!(segments.len() >= 2);
        for segment in &segments {
            assert!(segment.duration_ms(16000) <= 3000 + FRAME_MS);
        }
    }

    #[test]
    fn peak_energy_tracks_the_loudest_frame() {
        let mut asm = assembler();
        let mut items = Vec::new();
        for i in 0..10 {
            let level = if i == 4 { 0.8 } else { 0.2 };
            items.push((
                AudioFrame::new(vec![level; 480], Instant::now()),
                FrameClass::Speech,
            ));
        }
        items.extend((0..20).map(|_| silence()));

        let segments = feed(&mut asm, items);
        assert!((segments[0].peak_energy - 0.8).abs() < 1e-6);
    }
}
