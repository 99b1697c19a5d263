use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use video_pipeline::{config, consumer::ReportingConsumer, process_video};

/// Run object detection over a video file and report the per-frame boxes.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Video file to process
    video: PathBuf,

    /// Frames per batch, overriding `pipeline.chunk_size`
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Print the decoded results as indented JSON
    #[arg(long)]
    print: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut settings = config::get_configuration()?;
    if let Some(chunk_size) = args.chunk_size {
        settings.pipeline.chunk_size = chunk_size.max(1);
    }

    let log_level = &format!("{},ort=warn", settings.log_level.as_str());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let summary = process_video(args.video, &settings, ReportingConsumer::new(args.print)).await?;
    tracing::info!(
        frames = summary.frames,
        batches = summary.batches,
        detections = summary.detections,
        "Video processed"
    );

    Ok(())
}
