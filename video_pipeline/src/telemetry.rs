use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
use std::time::Duration;

/// Pipeline instruments, registered on the global meter provider.
///
/// Without an installed provider every instrument is a no-op.
pub struct PipelineMetrics {
    frames_processed: Counter<u64>,
    detections: Counter<u64>,
    batch_duration: Histogram<u64>,
    runs: Counter<u64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let meter = global::meter("video_pipeline");

        let frames_processed = meter
            .u64_counter("frames_processed_total")
            .with_description("Total number of frames run through the detector")
            .build();

        let detections = meter
            .u64_counter("detections_total")
            .with_description("Total number of bounding boxes produced")
            .build();

        let batch_duration = meter
            .u64_histogram("batch_duration_ms")
            .with_boundaries(exponential_boundaries(50.0, 2.0, 12))
            .with_description("Duration of one batch of frames in milliseconds")
            .build();

        let runs = meter
            .u64_counter("pipeline_runs_total")
            .with_description("Pipeline runs by outcome")
            .build();

        Self {
            frames_processed,
            detections,
            batch_duration,
            runs,
        }
    }

    pub fn record_batch(&self, frames: usize, detections: usize, duration: Duration) {
        self.frames_processed.add(frames as u64, &[]);
        self.detections.add(detections as u64, &[]);
        self.batch_duration.record(duration.as_millis() as u64, &[]);
    }

    pub fn record_run(&self, outcome: &'static str) {
        self.runs.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` histogram boundaries starting at `start`, each `factor` times the
/// previous one.
pub fn exponential_boundaries(start: f64, factor: f64, count: usize) -> Vec<f64> {
    std::iter::successors(Some(start), |previous| Some(previous * factor))
        .take(count)
        .collect()
}
