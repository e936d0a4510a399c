use std::path::PathBuf;
use std::sync::Arc;

use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

use crate::config::EngineConfig;
use crate::error::PipelineError;

/// Raw inference output before hallucination filtering
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub text: String,
    /// Mean token probability, 0.0..=1.0 - higher is more trustworthy
    pub confidence: f32,
}

/// The inference collaborator: audio samples in, text + confidence out.
/// The pipeline treats the implementation as an opaque black box; tests
/// substitute scripted mocks.
pub trait TranscriptionEngine: Send {
    fn transcribe(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        prompt: Option<&str>,
        language: &str,
    ) -> Result<EngineOutput, PipelineError>;
}

/// Local Whisper inference through whisper-rs.
pub struct WhisperEngine {
    // Context kept alive for the state borrowing it internally
    _ctx: Arc<WhisperContext>,
    state: WhisperState,
}

impl WhisperEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, PipelineError> {
        let model_path = Self::model_path(&config.model)?;

        println!("Loading Whisper model from: {}", model_path.display());

        let ctx_params = WhisperContextParameters {
            use_gpu: config.use_gpu,
            ..Default::default()
        };

        let ctx = WhisperContext::new_with_params(&model_path.to_string_lossy(), ctx_params)
            .map_err(|e| PipelineError::ModelUnavailable(format!("failed to load model: {}", e)))?;

        let ctx = Arc::new(ctx);
        let state = ctx
            .create_state()
            .map_err(|e| PipelineError::ModelUnavailable(format!("failed to create state: {}", e)))?;

        println!("Whisper model loaded successfully (GPU: {})", config.use_gpu);

        Ok(WhisperEngine { _ctx: ctx, state })
    }

    fn model_path(model_name: &str) -> Result<PathBuf, PipelineError> {
        let models_dir = dirs::home_dir()
            .ok_or_else(|| PipelineError::ModelUnavailable("no home directory".to_string()))?
            .join(".voicepipe")
            .join("models");

        let model_filename = format!("ggml-{}.bin", model_name);
        let model_path = models_dir.join(&model_filename);

        if !model_path.exists() {
            return Err(PipelineError::ModelUnavailable(format!(
                "model file not found: {} - download it from \
                 https://huggingface.co/ggerganov/whisper.cpp/tree/main \
                 and place it in {}",
                model_filename,
                models_dir.display()
            )));
        }

        Ok(model_path)
    }
}

impl TranscriptionEngine for WhisperEngine {
    fn transcribe(
        &mut self,
        samples: &[f32],
        _sample_rate: u32,
        prompt: Option<&str>,
        language: &str,
    ) -> Result<EngineOutput, PipelineError> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if !language.is_empty() && language != "auto" {
            params.set_language(Some(language));
        }
        if let Some(prompt) = prompt {
            params.set_initial_prompt(prompt);
        }

        params.set_translate(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        // Suppress annotations like [BLANK_AUDIO], (coughs), etc.
        params.set_suppress_blank(true);
        params.set_suppress_non_speech_tokens(true);

        // Greedy decoding at temperature 0 keeps hallucinations down
        params.set_temperature(0.0);
        params.set_temperature_inc(0.0);

        self.state
            .full(params, samples)
            .map_err(|e| PipelineError::ModelUnavailable(format!("inference failed: {}", e)))?;

        let num_segments = self
            .state
            .full_n_segments()
            .map_err(|e| PipelineError::ModelUnavailable(format!("segment count: {}", e)))?;

        let mut text = String::new();
        let mut prob_sum = 0.0f32;
        let mut token_count = 0u32;

        for i in 0..num_segments {
            let segment = self
                .state
                .full_get_segment_text(i)
                .map_err(|e| PipelineError::ModelUnavailable(format!("segment text: {}", e)))?;
            text.push_str(&segment);
            text.push(' ');

            let tokens = self
                .state
                .full_n_tokens(i)
                .map_err(|e| PipelineError::ModelUnavailable(format!("token count: {}", e)))?;
            for t in 0..tokens {
                let prob = self
                    .state
                    .full_get_token_prob(i, t)
                    .map_err(|e| PipelineError::ModelUnavailable(format!("token prob: {}", e)))?;
                prob_sum += prob;
                token_count += 1;
            }
        }

        let confidence = if token_count > 0 {
            prob_sum / token_count as f32
        } else {
            0.0
        };

        Ok(EngineOutput {
            text: text.trim().to_string(),
            confidence,
        })
    }
}
