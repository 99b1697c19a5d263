use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::time::Duration;
use video_pipeline::telemetry::exponential_boundaries;

/// Upload instruments plus the registry they are exported through.
///
/// Building this installs the global meter provider, so the pipeline's own
/// instruments land in the same registry.
pub struct Metrics {
    uploads: Counter<u64>,
    processing_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("upload_server");
        global::set_meter_provider(provider);

        let uploads = meter
            .u64_counter("uploads_total")
            .with_description("Uploaded videos by outcome")
            .build();

        let processing_duration = meter
            .u64_histogram("video_processing_duration_ms")
            .with_boundaries(exponential_boundaries(250.0, 2.0, 14))
            .with_description("Time from upload to processed results in milliseconds")
            .build();

        Ok(Metrics {
            uploads,
            processing_duration,
            registry,
        })
    }

    pub fn record_upload(&self, outcome: &'static str, duration: Duration) {
        let attributes = [KeyValue::new("outcome", outcome)];
        self.uploads.add(1, &attributes);
        self.processing_duration
            .record(duration.as_millis() as u64, &attributes);
    }
}
