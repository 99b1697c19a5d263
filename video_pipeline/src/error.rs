use crate::{
    accumulator::SequencingError, consumer::ConsumerError, detector::DetectorError,
    frame_source::SourceError, handoff::ChannelError, payload::PayloadError,
};
use thiserror::Error;
use tokio::task::JoinError;

/// Failure of a whole pipeline run. None of these are retried.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Sequencing error: {0}")]
    Sequencing(#[from] SequencingError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("Handoff channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),
    #[error("{unit} task failed: {source}")]
    TaskFailed {
        unit: &'static str,
        source: JoinError,
    },
}

impl PipelineError {
    /// True when the video could not be opened.
    pub fn is_open_error(&self) -> bool {
        matches!(self, PipelineError::Source(e) if e.is_open_error())
    }
}
