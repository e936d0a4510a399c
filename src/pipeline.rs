use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::AudioCapture;
use crate::calibration::{Calibrator, ProfileHandle};
use crate::config::Config;
use crate::constants::processing::{AUDIO_LEVEL_EVERY_FRAMES, MAX_DRAIN_FRAMES, POLL_INTERVAL_MS};
use crate::engine::TranscriptionEngine;
use crate::error::PipelineError;
use crate::events::{event_channel, EventSender, PipelineEvent};
use crate::frame::AudioFrame;
use crate::hallucination::HallucinationFilter;
use crate::preprocess::Preprocessor;
use crate::ring_buffer::FrameRing;
use crate::scheduler::{PreparedSegment, TextSink, TranscriptionScheduler};
use crate::segment::SegmentAssembler;
use crate::vad::VoiceActivityDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Listening,
    Paused,
}

enum Control {
    Pause,
    Resume,
    Recalibrate,
    Stop,
}

struct RecalibrationRun {
    frames: Vec<AudioFrame>,
    deadline: Instant,
}

/// The per-frame processing core: VAD, segment assembly, preprocessing
/// and transcription scheduling, driven one frame at a time.
///
/// Kept separate from `PipelineController` so tests can feed synthetic
/// frames without an audio device.
pub struct SessionCore {
    profile: ProfileHandle,
    calibrator: Calibrator,
    vad: VoiceActivityDetector,
    assembler: SegmentAssembler,
    preprocessor: Preprocessor,
    scheduler: TranscriptionScheduler,
    events: EventSender,
    recalibration: Option<RecalibrationRun>,
    frames_seen: u64,
}

impl SessionCore {
    pub fn new(
        config: &Config,
        profile: ProfileHandle,
        engine: Box<dyn TranscriptionEngine>,
        events: EventSender,
    ) -> Self {
        let filter = HallucinationFilter::new(&config.filter);
        let scheduler = TranscriptionScheduler::new(
            engine,
            &config.scheduler,
            filter,
            config.engine.language.clone(),
            config.engine.initial_prompt.clone(),
            events.clone(),
        );

        SessionCore {
            vad: VoiceActivityDetector::new(profile.clone(), config.vad.energy_window_frames),
            calibrator: Calibrator::new(config.vad.sensitivity, config.vad.variation_factor),
            assembler: SegmentAssembler::new(
                config.segmenter.hangover_ms,
                config.segmenter.min_segment_ms,
                config.segmenter.max_segment_ms,
                config.audio.frame_duration_ms,
            ),
            preprocessor: Preprocessor::default(),
            profile,
            scheduler,
            events,
            recalibration: None,
            frames_seen: 0,
        }
    }

    /// Run one frame through VAD and assembly; a finalized segment is
    /// preprocessed and handed to the scheduler.
    pub fn process_frame(&mut self, frame: AudioFrame) {
        self.frames_seen += 1;
        if self.frames_seen % AUDIO_LEVEL_EVERY_FRAMES == 0 {
            self.events
                .emit(PipelineEvent::AudioLevel { rms: frame.energy });
        }

        if let Some(run) = self.recalibration.as_mut() {
            // Frames during a re-calibration window are treated as ambient
            run.frames.push(frame);
            if Instant::now() >= run.deadline {
                self.finish_recalibration();
            }
            return;
        }

        let class = self.vad.classify(&frame);
        if let Some(segment) = self.assembler.offer(frame, class) {
            let duration_ms = segment.duration_ms(crate::constants::audio::SAMPLE_RATE);
            println!(
                "💾 Segment finalized: {:.1}s, peak energy {:.4}",
                duration_ms as f32 / 1000.0,
                segment.peak_energy
            );
            self.events.emit(PipelineEvent::SegmentFinalized {
                duration_ms,
                frames: segment.frame_count(),
            });

            let samples = self.preprocessor.process(&segment.samples());
            self.scheduler.submit(PreparedSegment {
                samples,
                peak_energy: segment.peak_energy,
                duration_ms,
            });
        }
    }

    /// Drain finished inference results into the sink
    pub fn poll(&mut self, sink: &mut dyn TextSink) {
        self.scheduler.poll(sink);
    }

    /// Start treating incoming frames as ambient noise for `duration`,
    /// then atomically swap in the freshly derived profile.
    pub fn begin_recalibration(&mut self, duration: Duration) {
        self.assembler.reset();
        self.recalibration = Some(RecalibrationRun {
            frames: Vec::new(),
            deadline: Instant::now() + duration,
        });
    }

    fn finish_recalibration(&mut self) {
        let Some(run) = self.recalibration.take() else {
            return;
        };
        match self.calibrator.from_frames(&run.frames) {
            Ok(profile) => {
                println!(
                    "🎚️  Re-calibrated: noise floor {:.4}, speech threshold {:.4}",
                    profile.noise_floor_energy, profile.speech_threshold
                );
                self.events.emit(PipelineEvent::CalibrationDone {
                    noise_floor: profile.noise_floor_energy,
                    speech_threshold: profile.speech_threshold,
                });
                self.profile.store(profile);
                self.vad.reset();
            }
            Err(e) => {
                // Keep the previous profile; re-calibration is best-effort
                eprintln!("⚠️  Re-calibration failed, keeping old profile: {}", e);
            }
        }
    }

    /// Suspend intake: the partial segment is discarded and the eventual
    /// result of any in-flight inference call is voided.
    pub fn pause(&mut self) {
        self.assembler.reset();
        self.scheduler.pause();
    }

    pub fn resume(&mut self) {
        self.scheduler.resume();
    }

    pub fn scheduler(&self) -> &TranscriptionScheduler {
        &self.scheduler
    }

    pub fn shutdown(self) {
        self.scheduler.shutdown();
    }
}

/// Session lifecycle owner: wires capture, calibration, the processing
/// thread and the scheduler into a running pipeline.
///
/// The cpal stream is not `Send`, so the controller (and its capture
/// handle) stay on the caller's thread; only the ring buffer crosses
/// into the processing thread.
pub struct PipelineController {
    config: Config,
    events: EventSender,
    capture: Option<AudioCapture>,
    worker: Option<JoinHandle<()>>,
    control_tx: Option<Sender<Control>>,
    state: PipelineState,
}

impl PipelineController {
    pub fn new(config: Config) -> (Self, Receiver<PipelineEvent>) {
        let (events, event_rx) = event_channel();
        (
            PipelineController {
                config,
                events,
                capture: None,
                worker: None,
                control_tx: None,
                state: PipelineState::Idle,
            },
            event_rx,
        )
    }

    pub fn state(&mut self) -> PipelineState {
        self.reap_failed_session();
        self.state
    }

    /// Calibrate against ambient noise, then begin the capture -> VAD ->
    /// assembly -> inference loop. Fails with `CalibrationError` or
    /// `DeviceError`; both leave the controller idle and retryable.
    pub fn start(
        &mut self,
        engine: Box<dyn TranscriptionEngine>,
        sink: Box<dyn TextSink>,
    ) -> Result<(), PipelineError> {
        self.reap_failed_session();
        if self.state != PipelineState::Idle {
            return Err(PipelineError::InvalidState("start() while running"));
        }

        let ring = FrameRing::new(self.config.audio.ring_capacity_frames);
        let mut capture = AudioCapture::new(
            ring.clone(),
            self.events.clone(),
            self.config.frame_samples(),
        )?;
        capture.start()?;

        // One-shot ambient measurement before any classification
        println!(
            "🎚️  Calibrating ({}ms of ambient audio)...",
            self.config.vad.calibration_duration_ms
        );
        let calibrator = Calibrator::new(
            self.config.vad.sensitivity,
            self.config.vad.variation_factor,
        );
        let profile = match calibrator.run(
            &ring,
            Duration::from_millis(self.config.vad.calibration_duration_ms),
        ) {
            Ok(profile) => profile,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        println!(
            "🎚️  Calibration done: noise floor {:.4}, speech threshold {:.4}",
            profile.noise_floor_energy, profile.speech_threshold
        );
        self.events.emit(PipelineEvent::CalibrationDone {
            noise_floor: profile.noise_floor_energy,
            speech_threshold: profile.speech_threshold,
        });

        let profile = ProfileHandle::new(profile);
        let core = SessionCore::new(&self.config, profile, engine, self.events.clone());

        let (control_tx, control_rx) = channel();
        let failure_flag = capture.failure_flag();
        let events = self.events.clone();
        let recalibration_duration =
            Duration::from_millis(self.config.vad.calibration_duration_ms);

        let worker = thread::spawn(move || {
            run_processing_loop(
                core,
                ring,
                control_rx,
                failure_flag,
                events,
                sink,
                recalibration_duration,
            );
        });

        self.capture = Some(capture);
        self.worker = Some(worker);
        self.control_tx = Some(control_tx);
        self.state = PipelineState::Listening;

        println!("👂 Listening...");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PipelineError> {
        if self.reap_failed_session() {
            return Err(PipelineError::Device(
                "audio device failed, session halted".to_string(),
            ));
        }
        if self.state != PipelineState::Listening {
            return Err(PipelineError::InvalidState("pause() while not listening"));
        }
        self.send_control(Control::Pause);
        self.state = PipelineState::Paused;
        println!("⏸️  Paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PipelineError> {
        if self.reap_failed_session() {
            return Err(PipelineError::Device(
                "audio device failed, session halted".to_string(),
            ));
        }
        if self.state != PipelineState::Paused {
            return Err(PipelineError::InvalidState("resume() while not paused"));
        }
        self.send_control(Control::Resume);
        self.state = PipelineState::Listening;
        println!("▶️  Resumed");
        Ok(())
    }

    /// Re-measure ambient noise and atomically replace the thresholds
    pub fn recalibrate(&mut self) -> Result<(), PipelineError> {
        if self.reap_failed_session() {
            return Err(PipelineError::Device(
                "audio device failed, session halted".to_string(),
            ));
        }
        if self.state != PipelineState::Listening {
            return Err(PipelineError::InvalidState(
                "recalibrate() while not listening",
            ));
        }
        self.send_control(Control::Recalibrate);
        Ok(())
    }

    /// Tear everything down in reverse dependency order: stop the
    /// processing loop (which shuts the scheduler and drops queued
    /// segments), then release the audio device.
    pub fn stop(&mut self) {
        self.reap_failed_session();
        if self.state == PipelineState::Idle {
            return;
        }

        self.send_control(Control::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.control_tx = None;

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }

        self.state = PipelineState::Idle;
        self.events.emit(PipelineEvent::Stopped);
        println!("🛑 Pipeline stopped");
    }

    fn send_control(&self, control: Control) {
        if let Some(tx) = self.control_tx.as_ref() {
            let _ = tx.send(control);
        }
    }

    /// Detect a session that died underneath us (capture stream error, or
    /// the processing thread exiting on the failure flag) and fold back to
    /// `Idle` so an explicit `start()` can retry. Returns true when a dead
    /// session was reaped.
    fn reap_failed_session(&mut self) -> bool {
        if self.state == PipelineState::Idle {
            return false;
        }

        let stream_failed = self.capture.as_ref().map_or(false, |c| c.has_failed());
        let worker_gone = self.worker.as_ref().map_or(false, |w| w.is_finished());
        if !stream_failed && !worker_gone {
            return false;
        }

        eprintln!("🔴 Session halted by a device failure; start() to retry");
        self.control_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.state = PipelineState::Idle;
        self.events.emit(PipelineEvent::Stopped);
        true
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_processing_loop(
    mut core: SessionCore,
    ring: FrameRing,
    control_rx: Receiver<Control>,
    failure_flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    events: EventSender,
    mut sink: Box<dyn TextSink>,
    recalibration_duration: Duration,
) {
    let mut paused = false;
    let mut last_overflow = ring.overflow_count();

    loop {
        match control_rx.try_recv() {
            Ok(Control::Pause) => {
                core.pause();
                paused = true;
            }
            Ok(Control::Resume) => {
                core.resume();
                paused = false;
            }
            Ok(Control::Recalibrate) => {
                core.begin_recalibration(recalibration_duration);
            }
            Ok(Control::Stop) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        if failure_flag.load(std::sync::atomic::Ordering::Acquire) {
            // DeviceFailed was already emitted from the stream error
            // callback; halt the session
            break;
        }

        let overflow = ring.overflow_count();
        if overflow > last_overflow {
            events.emit(PipelineEvent::Overflow {
                dropped_frames: overflow,
            });
            last_overflow = overflow;
        }

        let frames = ring.drain(MAX_DRAIN_FRAMES);
        let idle = frames.is_empty();
        for frame in frames {
            if paused {
                continue; // intake suspended, frames discarded
            }
            core.process_frame(frame);
        }

        core.poll(&mut *sink);

        if idle {
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }

    core.shutdown();
}
