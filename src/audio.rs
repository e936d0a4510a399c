use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::constants::audio::SAMPLE_RATE;
use crate::error::PipelineError;
use crate::events::{EventSender, PipelineEvent};
use crate::frame::AudioFrame;
use crate::ring_buffer::FrameRing;

/// Microphone capture feeding fixed-length frames into the ring buffer.
///
/// The cpal callback is the capture thread: it downmixes to mono,
/// resamples to the pipeline rate and chops the stream into frames, each
/// a bounded amount of work. Everything heavier happens on the
/// processing thread behind the ring.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    ring: FrameRing,
    events: EventSender,
    failed: Arc<AtomicBool>,
    frame_samples: usize,
}

impl AudioCapture {
    pub fn new(
        ring: FrameRing,
        events: EventSender,
        frame_samples: usize,
    ) -> Result<Self, PipelineError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| PipelineError::Device("no input device available".to_string()))?;

        let device_name = device
            .name()
            .unwrap_or_else(|_| "<unknown>".to_string());
        println!("Using audio input device: {}", device_name);

        let default_config = device
            .default_input_config()
            .map_err(|e| PipelineError::Device(format!("failed to get input config: {}", e)))?;

        let mut config: StreamConfig = default_config.into();

        // Prefer the pipeline rate directly; otherwise capture at the
        // device rate and resample in the callback
        let supports_16k = device
            .supported_input_configs()
            .map_err(|e| PipelineError::Device(format!("failed to query input configs: {}", e)))?
            .any(|c| c.min_sample_rate().0 <= SAMPLE_RATE && c.max_sample_rate().0 >= SAMPLE_RATE);

        if supports_16k {
            config.sample_rate = cpal::SampleRate(SAMPLE_RATE);
        } else {
            println!(
                "16kHz not supported, capturing at {}Hz and resampling",
                config.sample_rate.0
            );
        }

        println!(
            "Audio config: {} channels, {} Hz",
            config.channels, config.sample_rate.0
        );

        Ok(AudioCapture {
            device,
            config,
            stream: None,
            ring,
            events,
            failed: Arc::new(AtomicBool::new(false)),
            frame_samples,
        })
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.stream.is_some() {
            return Ok(()); // already capturing
        }

        self.failed.store(false, Ordering::Release);
        self.ring.clear();

        let ring = self.ring.clone();
        let channels = self.config.channels as usize;
        let device_rate = self.config.sample_rate.0;
        let frame_samples = self.frame_samples;
        // Device-rate samples needed per output frame
        let block_samples =
            (frame_samples as u64 * device_rate as u64 / SAMPLE_RATE as u64) as usize;

        let events = self.events.clone();
        let failed = Arc::clone(&self.failed);
        let err_fn = move |err: cpal::StreamError| {
            eprintln!("🔴 Audio stream error: {}", err);
            failed.store(true, Ordering::Release);
            events.emit(PipelineEvent::DeviceFailed {
                error: err.to_string(),
            });
        };

        // Device-rate mono samples awaiting a full frame
        let mut pending: Vec<f32> = Vec::with_capacity(block_samples * 2);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        pending.extend_from_slice(data);
                    } else {
                        for chunk in data.chunks(channels) {
                            let mono: f32 = chunk.iter().sum::<f32>() / channels as f32;
                            pending.push(mono);
                        }
                    }

                    while pending.len() >= block_samples {
                        let block: Vec<f32> = pending.drain(..block_samples).collect();
                        let samples = if device_rate == SAMPLE_RATE {
                            block
                        } else {
                            resample_to(&block, frame_samples)
                        };
                        ring.push(AudioFrame::new(samples, Instant::now()));
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| {
                PipelineError::Device(format!(
                    "failed to build input stream: {} (check microphone permissions)",
                    e
                ))
            })?;

        stream
            .play()
            .map_err(|e| PipelineError::Device(format!("failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        println!("🎤 Capture started");

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            println!("🎤 Capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// True once the stream reported an unrecoverable error
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Shared flag for the processing thread to watch
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Linear-interpolation resampling to an exact output length
fn resample_to(input: &[f32], output_len: usize) -> Vec<f32> {
    if input.is_empty() || output_len == 0 {
        return vec![0.0; output_len];
    }
    if input.len() == output_len {
        return input.to_vec();
    }

    let ratio = input.len() as f64 / output_len as f64;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let src_floor = src_idx.floor() as usize;
        let src_ceil = (src_floor + 1).min(input.len() - 1);
        let frac = src_idx - src_floor as f64;

        let sample = input[src_floor] * (1.0 - frac) as f32 + input[src_ceil] * frac as f32;
        output.push(sample);
    }

    output
}

/// Names of available input devices, for the CLI
pub fn list_input_devices() -> Result<Vec<String>, PipelineError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| PipelineError::Device(format!("failed to enumerate devices: {}", e)))?;

    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_preserves_length_contract() {
        let input = vec![0.5f32; 1440]; // 30ms at 48kHz
        let out = resample_to(&input, 480);
        assert_eq!(out.len(), 480);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn resample_identity_when_lengths_match() {
        let input: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(resample_to(&input, 480), input);
    }

    #[test]
    fn resample_interpolates_a_ramp() {
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_to(&input, 50);
        // Still monotonically increasing, endpoints preserved
        assert_eq!(out[0], 0.0);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
        assert!(out[49] >= 96.0);
    }
}
