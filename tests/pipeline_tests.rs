// End-to-end pipeline tests driving the processing core with synthetic
// frames: no audio device, no Whisper model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use voicepipe::calibration::{Calibrator, ProfileHandle};
use voicepipe::config::Config;
use voicepipe::engine::{EngineOutput, TranscriptionEngine};
use voicepipe::error::PipelineError;
use voicepipe::events::{event_channel, PipelineEvent};
use voicepipe::frame::AudioFrame;
use voicepipe::pipeline::SessionCore;
use voicepipe::scheduler::TextSink;

const FRAME_SAMPLES: usize = 480; // 30ms at 16kHz

/// Returns "utterance N" for the Nth call, logging the prompts it saw
struct CountingEngine {
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<Option<String>>>>,
}

impl CountingEngine {
    fn new() -> Self {
        CountingEngine {
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl TranscriptionEngine for CountingEngine {
    fn transcribe(
        &mut self,
        _samples: &[f32],
        _sample_rate: u32,
        prompt: Option<&str>,
        _language: &str,
    ) -> Result<EngineOutput, PipelineError> {
        self.prompts.lock().unwrap().push(prompt.map(str::to_string));
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EngineOutput {
            text: format!("utterance {}", n),
            confidence: 0.9,
        })
    }
}

#[derive(Default)]
struct CollectSink {
    texts: Vec<String>,
}

impl TextSink for CollectSink {
    fn emit(&mut self, text: &str) {
        self.texts.push(text.to_string());
    }
}

/// Alternating loud/soft frames: clears the energy threshold and carries
/// the frame-to-frame variation real speech has
fn speech_frame(i: usize) -> AudioFrame {
    let level = if i % 2 == 0 { 0.3 } else { 0.12 };
    AudioFrame::new(vec![level; FRAME_SAMPLES], Instant::now())
}

fn silence_frame() -> AudioFrame {
    AudioFrame::new(vec![0.001; FRAME_SAMPLES], Instant::now())
}

/// Ambient profile a quiet room would calibrate to
fn quiet_profile() -> ProfileHandle {
    let calibrator = Calibrator::new(2.5, 0.6);
    let ambient: Vec<AudioFrame> = (0..30)
        .map(|i| {
            let level = 0.004 + if i % 2 == 0 { 0.001 } else { -0.001 };
            AudioFrame::new(vec![level; FRAME_SAMPLES], Instant::now())
        })
        .collect();
    ProfileHandle::new(calibrator.from_frames(&ambient).unwrap())
}

fn feed_speech(core: &mut SessionCore, sink: &mut CollectSink, frames: usize) {
    for i in 0..frames {
        core.process_frame(speech_frame(i));
        core.poll(sink);
    }
}

fn feed_silence(core: &mut SessionCore, sink: &mut CollectSink, frames: usize) {
    for _ in 0..frames {
        core.process_frame(silence_frame());
        core.poll(sink);
    }
}

fn drive_until(core: &mut SessionCore, sink: &mut CollectSink, want: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while sink.texts.len() < want && Instant::now() < deadline {
        core.poll(sink);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn two_utterances_produce_two_ordered_transcripts() {
    let config = Config::default();
    let engine = CountingEngine::new();
    let prompts = Arc::clone(&engine.prompts);
    let (events, event_rx) = event_channel();
    let mut core = SessionCore::new(&config, quiet_profile(), Box::new(engine), events);
    let mut sink = CollectSink::default();

    // ~2s of speech, then enough silence to run out the hangover
    feed_speech(&mut core, &mut sink, 67);
    feed_silence(&mut core, &mut sink, 30);
    drive_until(&mut core, &mut sink, 1, Duration::from_secs(2));

    // ~1s more speech after a long pause
    feed_silence(&mut core, &mut sink, 140);
    feed_speech(&mut core, &mut sink, 34);
    feed_silence(&mut core, &mut sink, 30);
    drive_until(&mut core, &mut sink, 2, Duration::from_secs(2));

    assert_eq!(sink.texts, vec!["utterance 1", "utterance 2"]);

    let finalized: Vec<(u64, usize)> = event_rx
        .try_iter()
        .filter_map(|e| match e {
            PipelineEvent::SegmentFinalized {
                duration_ms,
                frames,
            } => Some((duration_ms, frames)),
            _ => None,
        })
        .collect();
    assert_eq!(finalized.len(), 2);
    // Speech plus retained hangover silence
    assert!(finalized[0].0 >= 2000);
    assert!(finalized[1].0 >= 1000);

    // The second inference call was biased by the first transcript
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].as_deref().unwrap().contains("utterance 1"));

    core.shutdown();
}

#[test]
fn silence_alone_never_reaches_the_engine() {
    let config = Config::default();
    let engine = CountingEngine::new();
    let calls = Arc::clone(&engine.calls);
    let (events, _event_rx) = event_channel();
    let mut core = SessionCore::new(&config, quiet_profile(), Box::new(engine), events);
    let mut sink = CollectSink::default();

    feed_silence(&mut core, &mut sink, 300); // ~9s of room tone
    thread::sleep(Duration::from_millis(50));
    core.poll(&mut sink);

    assert!(sink.texts.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    core.shutdown();
}

#[test]
fn sub_minimum_blip_produces_no_transcript() {
    let config = Config::default();
    let engine = CountingEngine::new();
    let calls = Arc::clone(&engine.calls);
    let (events, _event_rx) = event_channel();
    let mut core = SessionCore::new(&config, quiet_profile(), Box::new(engine), events);
    let mut sink = CollectSink::default();

    // 4 frames = 120ms, below the 250ms minimum
    feed_speech(&mut core, &mut sink, 4);
    feed_silence(&mut core, &mut sink, 30);
    thread::sleep(Duration::from_millis(50));
    core.poll(&mut sink);

    assert!(sink.texts.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    core.shutdown();
}

#[test]
fn pause_discards_the_partial_segment() {
    let config = Config::default();
    let engine = CountingEngine::new();
    let calls = Arc::clone(&engine.calls);
    let (events, _event_rx) = event_channel();
    let mut core = SessionCore::new(&config, quiet_profile(), Box::new(engine), events);
    let mut sink = CollectSink::default();

    // Speech is mid-accumulation when the pause lands
    feed_speech(&mut core, &mut sink, 40);
    core.pause();
    core.resume();

    // Silence after resume; the discarded partial must not finalize
    feed_silence(&mut core, &mut sink, 40);
    thread::sleep(Duration::from_millis(50));
    core.poll(&mut sink);

    assert!(sink.texts.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    core.shutdown();
}

#[test]
fn recalibration_swaps_thresholds_atomically() {
    let config = Config::default();
    let engine = CountingEngine::new();
    let (events, event_rx) = event_channel();
    let profile = quiet_profile();
    let threshold_before = profile.load().speech_threshold;
    let mut core = SessionCore::new(&config, profile.clone(), Box::new(engine), events);
    let mut sink = CollectSink::default();

    core.begin_recalibration(Duration::from_millis(200));

    // A noisier room than the original calibration saw
    let deadline = Instant::now() + Duration::from_millis(400);
    let mut i = 0;
    while Instant::now() < deadline {
        let level = 0.05 + if i % 2 == 0 { 0.01 } else { -0.01 };
        core.process_frame(AudioFrame::new(
            vec![level; FRAME_SAMPLES],
            Instant::now(),
        ));
        core.poll(&mut sink);
        i += 1;
        thread::sleep(Duration::from_millis(10));
    }

    let done = event_rx
        .try_iter()
        .any(|e| matches!(e, PipelineEvent::CalibrationDone { .. }));
    assert!(done);
    assert!(profile.load().speech_threshold > threshold_before);
    core.shutdown();
}

#[test]
fn audio_level_events_are_emitted_periodically() {
    let config = Config::default();
    let engine = CountingEngine::new();
    let (events, event_rx) = event_channel();
    let mut core = SessionCore::new(&config, quiet_profile(), Box::new(engine), events);
    let mut sink = CollectSink::default();

    feed_silence(&mut core, &mut sink, 100);

    let levels = event_rx
        .try_iter()
        .filter(|e| matches!(e, PipelineEvent::AudioLevel { .. }))
        .count();
    // One report per 10 frames
    assert_eq!(levels, 10);
    core.shutdown();
}
