use crate::{
    config::Settings,
    consumer::Consumer,
    detector::Detector,
    error::PipelineError,
    frame_source::{FrameSource, SourceError, VideoFileSource},
    handoff,
    ort_detector::OrtDetector,
    pipeline::{Pipeline, RunSummary},
    telemetry::PipelineMetrics,
    tracker::{ByteTracker, TrackingDetector},
};
use std::path::PathBuf;
use tracing::instrument;

/// Runs one producer and one consumer to completion.
///
/// The producer opens the source, drives `pipeline` over it on a blocking
/// thread and sends the sealed payload; the consumer waits for that payload
/// and hands it to `consumer`. Both are joined before returning. A producer
/// failure is reported in preference to the consumer's resulting
/// [`ChannelError::SenderDropped`](crate::handoff::ChannelError).
pub async fn run_pipeline<S, D, C, F>(
    open_source: F,
    mut pipeline: Pipeline<D>,
    mut consumer: C,
) -> Result<RunSummary, PipelineError>
where
    F: FnOnce() -> Result<S, SourceError> + Send + 'static,
    S: FrameSource + 'static,
    D: Detector + 'static,
    C: Consumer,
{
    let metrics = PipelineMetrics::new();
    let (sender, receiver) = handoff::channel();

    let producer = tokio::task::spawn_blocking(move || -> Result<RunSummary, PipelineError> {
        let source = open_source()?;
        let (payload, summary) = pipeline.run(source)?;
        sender.send(payload)?;
        Ok(summary)
    });

    let consumer = tokio::spawn(async move {
        let payload = receiver.receive().await?;
        consumer.accept(payload)?;
        Ok::<(), PipelineError>(())
    });

    let (produced, consumed) = tokio::join!(producer, consumer);

    let outcome = produced
        .map_err(|source| PipelineError::TaskFailed {
            unit: "producer",
            source,
        })
        .and_then(|result| result)
        .and_then(|summary| {
            consumed
                .map_err(|source| PipelineError::TaskFailed {
                    unit: "consumer",
                    source,
                })?
                .map(|()| summary)
        });

    match &outcome {
        Ok(summary) => {
            metrics.record_run("success");
            tracing::info!(
                frames = summary.frames,
                detections = summary.detections,
                "Pipeline run finished"
            );
        }
        Err(e) => {
            metrics.record_run("failure");
            tracing::error!("Pipeline run failed: {}", e);
        }
    }

    outcome
}

/// Loads the model, then processes the video at `path` end to end.
#[instrument(skip_all, fields(video = %path.display()))]
pub async fn process_video<C: Consumer>(
    path: PathBuf,
    settings: &Settings,
    consumer: C,
) -> Result<RunSummary, PipelineError> {
    let model = settings.model.clone();
    let detector = tokio::task::spawn_blocking(move || OrtDetector::load(&model))
        .await
        .map_err(|source| PipelineError::TaskFailed {
            unit: "model loader",
            source,
        })??;

    let tracker = settings
        .model
        .tracking
        .then(|| ByteTracker::new(&settings.tracker));
    let pipeline = Pipeline::new(TrackingDetector::new(detector, tracker), &settings.pipeline);
    run_pipeline(move || VideoFileSource::open(path), pipeline, consumer).await
}
