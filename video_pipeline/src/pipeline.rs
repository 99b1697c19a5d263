use crate::{
    accumulator::ResultAccumulator,
    batch::Batches,
    config::PipelineSettings,
    detector::Detector,
    error::PipelineError,
    frame_source::FrameSource,
    payload::Payload,
    telemetry::PipelineMetrics,
};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub batches: u64,
    pub detections: u64,
}

/// Producer side of a run: frames in, one sealed payload out.
///
/// Owns the detector for the whole run, so model and device state live
/// exactly as long as the pipeline value.
pub struct Pipeline<D> {
    detector: D,
    chunk_size: usize,
    reclaim_between_batches: bool,
    metrics: PipelineMetrics,
}

impl<D: Detector> Pipeline<D> {
    pub fn new(detector: D, settings: &PipelineSettings) -> Self {
        Self {
            detector,
            chunk_size: settings.chunk_size,
            reclaim_between_batches: settings.reclaim_between_batches,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn into_detector(self) -> D {
        self.detector
    }

    /// Drains `source` batch by batch and seals the results.
    ///
    /// The source is dropped, releasing the video, before this returns on
    /// every path.
    pub fn run<S: FrameSource>(&mut self, source: S) -> Result<(Payload, RunSummary), PipelineError> {
        let mut accumulator = ResultAccumulator::new();
        let mut summary = RunSummary::default();

        tracing::info!(
            chunk_size = self.chunk_size,
            device = %self.detector.device(),
            "Starting pipeline run"
        );

        for batch in Batches::new(source, self.chunk_size) {
            let batch = batch?;
            let started = Instant::now();
            let frames = batch.len();
            let mut detections = 0;

            for (index, frame) in batch.into_indexed() {
                let found = self.detector.detect(&frame)?;
                detections += found.len();
                accumulator.record(index, found.into_iter().map(|d| d.bbox).collect())?;
            }

            if self.reclaim_between_batches {
                self.detector.reclaim();
            }

            summary.batches += 1;
            summary.frames += frames as u64;
            summary.detections += detections as u64;
            self.metrics.record_batch(frames, detections, started.elapsed());
            tracing::debug!(
                batch = summary.batches,
                frames,
                detections,
                elapsed_ms = started.elapsed().as_millis() as u64,
                total_frames = summary.frames,
                "Processed batch"
            );
        }

        let payload = accumulator.seal()?;
        tracing::info!(
            frames = summary.frames,
            batches = summary.batches,
            detections = summary.detections,
            "Sealed results"
        );
        Ok((payload, summary))
    }
}
