pub mod accumulator;
pub mod app;
pub mod batch;
pub mod config;
pub mod consumer;
pub mod detector;
pub mod error;
pub mod frame;
pub mod frame_source;
pub mod handoff;
pub mod ort_detector;
pub mod payload;
pub mod pipeline;
pub mod telemetry;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use app::{process_video, run_pipeline};
pub use error::PipelineError;
pub use pipeline::{Pipeline, RunSummary};
