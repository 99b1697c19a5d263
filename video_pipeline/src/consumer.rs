use crate::payload::{Payload, PayloadError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),
}

/// Receiving end of a pipeline run. `accept` is called once per run.
pub trait Consumer: Send + 'static {
    fn accept(&mut self, payload: Payload) -> Result<(), ConsumerError>;
}

/// Decodes the payload and reports what it contains.
#[derive(Debug, Default, Clone)]
pub struct ReportingConsumer {
    print_results: bool,
}

impl ReportingConsumer {
    /// With `print_results`, the decoded results are also written to stdout
    /// as indented JSON.
    pub fn new(print_results: bool) -> Self {
        Self { print_results }
    }
}

impl Consumer for ReportingConsumer {
    fn accept(&mut self, payload: Payload) -> Result<(), ConsumerError> {
        let results = payload.decode()?;

        let frames_with_detections = results.values().filter(|boxes| !boxes.is_empty()).count();
        let detections: usize = results.values().map(Vec::len).sum();
        tracing::info!(
            frames = results.len(),
            frames_with_detections,
            detections,
            payload_bytes = payload.len(),
            "Received detection results"
        );

        if self.print_results {
            let pretty = serde_json::to_string_pretty(&results).map_err(PayloadError::Encode)?;
            println!("{pretty}");
        }

        Ok(())
    }
}
