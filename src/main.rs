mod audio;
mod calibration;
mod config;
mod constants;
mod engine;
mod error;
mod events;
mod frame;
mod hallucination;
mod pipeline;
mod preprocess;
mod ring_buffer;
mod scheduler;
mod segment;
mod vad;

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use calibration::Calibrator;
use config::Config;
use engine::WhisperEngine;
use events::{event_channel, PipelineEvent};
use pipeline::PipelineController;
use ring_buffer::FrameRing;
use scheduler::TextSink;

#[derive(Parser)]
#[command(name = "voicepipe")]
#[command(about = "Streaming microphone transcription pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure ambient noise and print the derived thresholds
    Calibrate {
        /// How long to sample ambient audio, in milliseconds
        #[arg(short, long, default_value = "1000")]
        duration: u64,
    },
    /// List available audio input devices
    ListDevices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Calibrate { duration }) => calibrate_command(duration),
        Some(Commands::ListDevices) => list_devices_command(),
        None => run_app(),
    }
}

/// Prints every accepted transcript on its own line
struct StdoutSink;

impl TextSink for StdoutSink {
    fn emit(&mut self, text: &str) {
        println!("📝 {}", text);
    }
}

fn run_app() -> Result<()> {
    println!("Voicepipe - streaming transcription");

    let config = Config::load_or_create()?;
    println!("Configuration loaded successfully");

    let engine = WhisperEngine::new(&config.engine)?;

    let (mut controller, event_rx) = PipelineController::new(config);
    controller.start(Box::new(engine), Box::new(StdoutSink))?;

    // Surface pipeline events as they happen; the thread ends when the
    // controller (and its event sender) is dropped
    let event_logger = std::thread::spawn(move || {
        for event in event_rx {
            match event {
                PipelineEvent::Overflow { dropped_frames } => {
                    eprintln!("⚠️  Capture overflow, {} frames dropped so far", dropped_frames);
                }
                PipelineEvent::DeviceFailed { error } => {
                    eprintln!("🔴 Audio device failed: {}", error);
                }
                PipelineEvent::EngineUnavailable { error } => {
                    eprintln!("❌ Engine error: {}", error);
                }
                PipelineEvent::Stopped => break,
                _ => {}
            }
        }
    });

    println!();
    println!("Commands: pause | resume | recalibrate | quit (or just Enter)");
    println!();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            "pause" | "p" => {
                if let Err(e) = controller.pause() {
                    eprintln!("⚠️  {}", e);
                }
            }
            "resume" | "r" => {
                if let Err(e) = controller.resume() {
                    eprintln!("⚠️  {}", e);
                }
            }
            "recalibrate" | "c" => {
                if let Err(e) = controller.recalibrate() {
                    eprintln!("⚠️  {}", e);
                }
            }
            "quit" | "q" | "" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    controller.stop();
    let _ = event_logger.join();

    Ok(())
}

fn calibrate_command(duration_ms: u64) -> Result<()> {
    println!("Voicepipe - calibration check");
    println!();

    let config = Config::load_or_create()?;

    let (events, _event_rx) = event_channel();
    let ring = FrameRing::new(config.audio.ring_capacity_frames);
    let mut capture = audio::AudioCapture::new(ring.clone(), events, config.frame_samples())?;
    capture.start()?;

    println!("Stay quiet for {}ms...", duration_ms);
    let calibrator = Calibrator::new(config.vad.sensitivity, config.vad.variation_factor);
    let profile = calibrator.run(&ring, Duration::from_millis(duration_ms))?;
    capture.stop();

    println!();
    println!("Ambient noise profile:");
    println!("  noise floor energy:  {:.6}", profile.noise_floor_energy);
    println!("  speech threshold:    {:.6}", profile.speech_threshold);
    println!("  variation threshold: {:.6}", profile.variation_threshold);
    println!();
    println!(
        "The pipeline calibrates automatically on every start; these values \
         are a point-in-time reading of your environment."
    );
    io::stdout().flush()?;

    Ok(())
}

fn list_devices_command() -> Result<()> {
    let devices = audio::list_input_devices()?;
    if devices.is_empty() {
        println!("No audio input devices found");
    } else {
        println!("Available input devices:");
        for name in devices {
            println!("  {}", name);
        }
    }
    Ok(())
}
