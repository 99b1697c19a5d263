use crate::detector::BoundingBox;
use crate::frame::FrameIndex;
use std::collections::BTreeMap;
use thiserror::Error;

/// Ordered mapping from frame index to the boxes detected in that frame.
pub type ResultMap = BTreeMap<FrameIndex, Vec<BoundingBox>>;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Failed to encode results: {0}")]
    Encode(serde_json::Error),
    #[error("Failed to decode results: {0}")]
    Decode(serde_json::Error),
}

/// Serialized snapshot of a [`ResultMap`].
///
/// The text is a JSON object keyed by the frame index as a string, each value
/// a list of `[x1, y1, x2, y2]` boxes, e.g.
/// `{"0":[[12.0,8.5,100.2,90.0]],"1":[]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(String);

impl Payload {
    pub fn encode(results: &ResultMap) -> Result<Self, PayloadError> {
        serde_json::to_string(results)
            .map(Self)
            .map_err(PayloadError::Encode)
    }

    pub fn decode(&self) -> Result<ResultMap, PayloadError> {
        serde_json::from_str(&self.0).map_err(PayloadError::Decode)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(text)
    }
}
