use std::collections::VecDeque;
use std::sync::mpsc::{channel, sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::SchedulerConfig;
use crate::constants::audio::MIN_WHISPER_SAMPLES;
use crate::engine::{EngineOutput, TranscriptionEngine};
use crate::error::PipelineError;
use crate::events::{EventSender, PipelineEvent};
use crate::hallucination::{HallucinationFilter, Verdict};

/// Downstream consumer of accepted transcripts (typed output, UI, ...).
/// The scheduler guarantees at most one emission per finalized segment.
pub trait TextSink: Send {
    fn emit(&mut self, text: &str);
}

/// A finalized, preprocessed segment ready for inference
#[derive(Debug, Clone)]
pub struct PreparedSegment {
    pub samples: Vec<f32>,
    pub peak_energy: f32,
    pub duration_ms: u64,
}

/// Bounded FIFO of recently accepted transcripts, rendered into the
/// prompt that biases the next inference call.
pub struct TranscriptionContext {
    entries: VecDeque<String>,
    max_entries: usize,
}

impl TranscriptionContext {
    pub fn new(max_entries: usize) -> Self {
        TranscriptionContext {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Record an accepted transcript, evicting the oldest past the bound
    pub fn push(&mut self, text: String) {
        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(text);
    }

    /// Render the context as a prompt, newest entries favored when the
    /// character budget forces truncation. Returns None when empty.
    pub fn render(&self, char_budget: usize) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }

        // Walk newest to oldest, keeping whole entries that fit
        let mut kept: Vec<&str> = Vec::new();
        let mut used = 0usize;
        for entry in self.entries.iter().rev() {
            let cost = entry.chars().count() + if kept.is_empty() { 0 } else { 1 };
            if used + cost > char_budget {
                break;
            }
            used += cost;
            kept.push(entry);
        }

        if kept.is_empty() {
            // Even the newest entry alone is over budget - keep its tail
            let newest = self.entries.back()?;
            let chars: Vec<char> = newest.chars().collect();
            let start = chars.len().saturating_sub(char_budget);
            return Some(chars[start..].iter().collect());
        }

        kept.reverse();
        Some(kept.join(" "))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

struct InferenceJob {
    samples: Vec<f32>,
    prompt: Option<String>,
    language: String,
    epoch: u64,
    peak_energy: f32,
}

struct InferenceReply {
    epoch: u64,
    peak_energy: f32,
    outcome: Result<EngineOutput, PipelineError>,
}

/// Serializes segment submission to the inference engine.
///
/// Exactly one inference call is in flight at any time; the single-slot
/// job channel is the in-flight token. Segments queue behind it up to a
/// bounded depth - past that the OLDEST pending segment is dropped with a
/// `BacklogDropped` event, favoring fresh audio over stale backlog.
/// Context updates happen strictly in submission order.
///
/// `pause()` bumps an epoch counter: a result arriving from before the
/// bump is discarded, so an in-flight call can complete harmlessly while
/// the pipeline is paused or stopping.
pub struct TranscriptionScheduler {
    job_tx: Option<SyncSender<InferenceJob>>,
    reply_rx: Receiver<InferenceReply>,
    worker: Option<JoinHandle<()>>,
    pending: VecDeque<PreparedSegment>,
    max_pending: usize,
    in_flight: bool,
    epoch: u64,
    paused: bool,
    context: TranscriptionContext,
    context_char_budget: usize,
    filter: HallucinationFilter,
    language: String,
    initial_prompt: String,
    cancel_timeout: Duration,
    events: EventSender,
}

impl TranscriptionScheduler {
    pub fn new(
        mut engine: Box<dyn TranscriptionEngine>,
        config: &SchedulerConfig,
        filter: HallucinationFilter,
        language: String,
        initial_prompt: String,
        events: EventSender,
    ) -> Self {
        // Single-slot job channel: the free slot is the in-flight token
        let (job_tx, job_rx) = sync_channel::<InferenceJob>(1);
        let (reply_tx, reply_rx) = channel::<InferenceReply>();

        let worker = thread::spawn(move || {
            for job in job_rx {
                let outcome = engine.transcribe(
                    &job.samples,
                    crate::constants::audio::SAMPLE_RATE,
                    job.prompt.as_deref(),
                    &job.language,
                );
                let reply = InferenceReply {
                    epoch: job.epoch,
                    peak_energy: job.peak_energy,
                    outcome,
                };
                if reply_tx.send(reply).is_err() {
                    break; // scheduler gone, stop quietly
                }
            }
        });

        TranscriptionScheduler {
            job_tx: Some(job_tx),
            reply_rx,
            worker: Some(worker),
            pending: VecDeque::new(),
            max_pending: config.max_pending,
            in_flight: false,
            epoch: 0,
            paused: false,
            context: TranscriptionContext::new(config.context_entries),
            context_char_budget: config.context_char_budget,
            filter,
            language,
            initial_prompt,
            cancel_timeout: Duration::from_millis(config.cancel_timeout_ms),
            events,
        }
    }

    /// Accept a finalized segment. Queued behind any in-flight call;
    /// the oldest pending segment drops past the queue bound.
    pub fn submit(&mut self, segment: PreparedSegment) {
        if self.paused {
            return;
        }

        if self.in_flight {
            self.pending.push_back(segment);
            while self.pending.len() > self.max_pending {
                self.pending.pop_front();
                println!("⚠️  Inference backlog full, dropping oldest pending segment");
                self.events.emit(PipelineEvent::BacklogDropped);
            }
        } else {
            self.dispatch(segment);
        }
    }

    /// Drain finished inference replies, run the hallucination filter and
    /// move the next pending segment into the in-flight slot. Non-blocking.
    pub fn poll(&mut self, sink: &mut dyn TextSink) {
        while let Ok(reply) = self.reply_rx.try_recv() {
            self.in_flight = false;

            if reply.epoch != self.epoch {
                // Paused or stopped after submission - result is void
                continue;
            }

            match reply.outcome {
                Ok(output) => self.judge(output, reply.peak_energy, sink),
                Err(e) => {
                    eprintln!("❌ Inference failed, dropping segment: {}", e);
                    self.events.emit(PipelineEvent::EngineUnavailable {
                        error: e.to_string(),
                    });
                }
            }
        }

        if !self.in_flight && !self.paused {
            if let Some(next) = self.pending.pop_front() {
                self.dispatch(next);
            }
        }
    }

    /// Stop accepting segments and void the in-flight call's result.
    pub fn pause(&mut self) {
        self.paused = true;
        self.epoch += 1;
        self.pending.clear();
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn context(&self) -> &TranscriptionContext {
        &self.context
    }

    /// Tear down the worker. The in-flight call may finish within the
    /// configured timeout; past it the thread is left to exit on its own
    /// once the engine returns (the closed job channel ends its loop).
    pub fn shutdown(mut self) {
        self.epoch += 1;
        self.pending.clear();
        self.job_tx.take(); // close the channel, worker loop ends

        let Some(worker) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + self.cancel_timeout;
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if worker.is_finished() {
            let _ = worker.join();
        } else {
            eprintln!(
                "⚠️  Inference still running after {:?}, detaching worker",
                self.cancel_timeout
            );
        }
    }

    fn dispatch(&mut self, segment: PreparedSegment) {
        let Some(job_tx) = self.job_tx.as_ref() else {
            return;
        };

        let mut samples = segment.samples;
        // Whisper rounds very short inputs down to nothing - pad with
        // trailing silence up to the floor
        if samples.len() < MIN_WHISPER_SAMPLES {
            samples.resize(MIN_WHISPER_SAMPLES, 0.0);
        }

        let job = InferenceJob {
            samples,
            prompt: self.build_prompt(),
            language: self.language.clone(),
            epoch: self.epoch,
            peak_energy: segment.peak_energy,
        };

        match job_tx.try_send(job) {
            Ok(()) => self.in_flight = true,
            Err(TrySendError::Full(_)) => {
                // Slot already occupied; should not happen while in_flight
                // bookkeeping holds, but never block the processing thread
                eprintln!("⚠️  Inference slot unexpectedly full, dropping segment");
                self.events.emit(PipelineEvent::BacklogDropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                eprintln!("❌ Inference worker disconnected");
                self.events.emit(PipelineEvent::EngineUnavailable {
                    error: "inference worker disconnected".to_string(),
                });
            }
        }
    }

    fn build_prompt(&self) -> Option<String> {
        let context = self.context.render(self.context_char_budget);
        match (self.initial_prompt.is_empty(), context) {
            (true, None) => None,
            (true, Some(ctx)) => Some(ctx),
            (false, None) => Some(self.initial_prompt.clone()),
            (false, Some(ctx)) => Some(format!("{} {}", self.initial_prompt, ctx)),
        }
    }

    fn judge(&mut self, output: EngineOutput, peak_energy: f32, sink: &mut dyn TextSink) {
        match self.filter.evaluate(&output.text, output.confidence, peak_energy) {
            Verdict::Accepted => {
                println!("✅ Transcript accepted: \"{}\"", output.text);
                self.context.push(output.text.clone());
                sink.emit(&output.text);
                self.events.emit(PipelineEvent::TranscriptAccepted { text: output.text });
            }
            Verdict::Rejected(reason) => {
                println!(
                    "🚫 Transcript rejected ({}): \"{}\"",
                    reason.as_str(),
                    output.text
                );
                self.events.emit(PipelineEvent::TranscriptRejected {
                    text: output.text,
                    reason: reason.as_str().to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_evicts_oldest_first() {
        let mut ctx = TranscriptionContext::new(3);
        for text in ["one", "two", "three", "four"] {
            ctx.push(text.to_string());
        }
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.render(100).unwrap(), "two three four");
    }

    #[test]
    fn context_render_favors_newest_under_budget() {
        let mut ctx = TranscriptionContext::new(8);
        ctx.push("a very long opening sentence".to_string());
        ctx.push("tail".to_string());
        // Budget only fits the newest entry
        assert_eq!(ctx.render(10).unwrap(), "tail");
    }

    #[test]
    fn context_render_truncates_a_single_oversized_entry() {
        let mut ctx = TranscriptionContext::new(2);
        ctx.push("abcdefghij".to_string());
        assert_eq!(ctx.render(4).unwrap(), "ghij");
    }

    #[test]
    fn empty_context_renders_nothing() {
        let ctx = TranscriptionContext::new(4);
        assert!(ctx.render(100).is_none());
    }
}
