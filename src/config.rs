use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Duration of one analysis frame
    #[serde(default = "default_frame_duration")]
    pub frame_duration_ms: u64,
    /// Ring buffer capacity in frames; oldest frames drop past this
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity_frames: usize,
}

fn default_frame_duration() -> u64 {
    30
}

fn default_ring_capacity() -> usize {
    256 // ~7.7s of audio at 30ms frames
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            frame_duration_ms: default_frame_duration(),
            ring_capacity_frames: default_ring_capacity(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VadConfig {
    /// Ambient warm-up duration for calibration
    #[serde(default = "default_calibration_duration")]
    pub calibration_duration_ms: u64,
    /// Sensitivity multiplier k: speech_threshold = noise_floor + k * stddev
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    /// Fraction of the calibrated energy stddev required as short-term
    /// variation before a loud frame counts as speech
    #[serde(default = "default_variation_factor")]
    pub variation_factor: f32,
    /// Rolling window (in frames) over which short-term variation is measured
    #[serde(default = "default_energy_window")]
    pub energy_window_frames: usize,
}

fn default_calibration_duration() -> u64 {
    1000
}

fn default_sensitivity() -> f32 {
    2.5
}

fn default_variation_factor() -> f32 {
    0.6
}

fn default_energy_window() -> usize {
    8
}

impl Default for VadConfig {
    fn default() -> Self {
        VadConfig {
            calibration_duration_ms: default_calibration_duration(),
            sensitivity: default_sensitivity(),
            variation_factor: default_variation_factor(),
            energy_window_frames: default_energy_window(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SegmenterConfig {
    /// Trailing silence retained after speech before a segment finalizes
    #[serde(default = "default_hangover")]
    pub hangover_ms: u64,
    /// Segments shorter than this are discarded as noise
    #[serde(default = "default_min_segment")]
    pub min_segment_ms: u64,
    /// Hard cap forcing finalization even without silence
    #[serde(default = "default_max_segment")]
    pub max_segment_ms: u64,
}

fn default_hangover() -> u64 {
    400
}

fn default_min_segment() -> u64 {
    250
}

fn default_max_segment() -> u64 {
    15000
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            hangover_ms: default_hangover(),
            min_segment_ms: default_min_segment(),
            max_segment_ms: default_max_segment(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Segments allowed to wait behind the in-flight inference call.
    /// Past this, the oldest pending segment is dropped (fresh audio wins).
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Accepted transcripts kept for prompt context (FIFO eviction)
    #[serde(default = "default_context_entries")]
    pub context_entries: usize,
    /// Character budget for the rendered prompt; oldest text truncates first
    #[serde(default = "default_context_budget")]
    pub context_char_budget: usize,
    /// How long `stop()` waits for an in-flight inference call
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_ms: u64,
}

fn default_max_pending() -> usize {
    1
}

fn default_context_entries() -> usize {
    8
}

fn default_context_budget() -> usize {
    512
}

fn default_cancel_timeout() -> u64 {
    3000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_pending: default_max_pending(),
            context_entries: default_context_entries(),
            context_char_budget: default_context_budget(),
            cancel_timeout_ms: default_cancel_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterConfig {
    /// Results below this engine confidence are rejected outright
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// Blocklist matches only reject when segment peak energy was below this
    #[serde(default = "default_low_energy")]
    pub low_energy_threshold: f32,
    /// Phrases Whisper is known to invent on near-silent input
    #[serde(default = "default_blocklist")]
    pub blocklist: Vec<String>,
}

fn default_confidence_floor() -> f32 {
    0.4
}

fn default_low_energy() -> f32 {
    0.02
}

fn default_blocklist() -> Vec<String> {
    [
        "thank you",
        "thanks for watching",
        "thank you for watching",
        "subtitles by the amara org community",
        "you",
        "bye",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            confidence_floor: default_confidence_floor(),
            low_energy_threshold: default_low_energy(),
            blocklist: default_blocklist(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_use_gpu")]
    pub use_gpu: bool,
    /// Optional user prompt prepended to the rolling context
    #[serde(default)]
    pub initial_prompt: String,
}

fn default_model() -> String {
    "small.en".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_use_gpu() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model: default_model(),
            language: default_language(),
            use_gpu: default_use_gpu(),
            initial_prompt: String::new(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".voicepipe"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.yaml"))
    }

    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                serde_yaml::from_str(&contents).context("Failed to parse config file")?;

            config.validate()?;

            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            println!("Created default config at: {}", config_path.display());
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.audio.frame_duration_ms == 0 || self.audio.frame_duration_ms > 500 {
            bail!("frame_duration_ms must be between 1 and 500");
        }
        if self.audio.ring_capacity_frames < 8 {
            bail!("ring_capacity_frames must be >= 8");
        }

        if self.vad.calibration_duration_ms < 200 {
            bail!("calibration_duration_ms must be >= 200");
        }
        if self.vad.sensitivity <= 0.0 {
            bail!("sensitivity must be > 0");
        }
        if self.vad.energy_window_frames < 2 {
            bail!("energy_window_frames must be >= 2");
        }

        if self.segmenter.min_segment_ms >= self.segmenter.max_segment_ms {
            bail!("min_segment_ms must be below max_segment_ms");
        }
        if self.segmenter.hangover_ms == 0 {
            bail!("hangover_ms must be greater than 0");
        }

        if self.scheduler.max_pending == 0 {
            bail!("max_pending must be >= 1");
        }
        if self.scheduler.context_char_budget == 0 {
            bail!("context_char_budget must be > 0");
        }

        if !(0.0..=1.0).contains(&self.filter.confidence_floor) {
            bail!("confidence_floor must be between 0.0 and 1.0");
        }
        if self.filter.low_energy_threshold < 0.0 {
            bail!("low_energy_threshold must be >= 0.0");
        }

        if self.engine.model.is_empty() {
            bail!("model name cannot be empty");
        }
        if self.engine.language.is_empty() {
            bail!("language code cannot be empty");
        }

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        let config_path = Self::config_path()?;
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs::write(&config_path, yaml).context("Failed to write config file")?;

        Ok(())
    }

    /// Samples per analysis frame at the pipeline sample rate
    pub fn frame_samples(&self) -> usize {
        (crate::constants::audio::SAMPLE_RATE as u64 * self.audio.frame_duration_ms / 1000) as usize
    }
}
