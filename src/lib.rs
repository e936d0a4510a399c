// Library exports for testing
pub mod audio;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod hallucination;
pub mod pipeline;
pub mod preprocess;
pub mod ring_buffer;
pub mod scheduler;
pub mod segment;
pub mod vad;
