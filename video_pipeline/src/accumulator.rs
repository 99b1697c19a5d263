use crate::detector::BoundingBox;
use crate::frame::FrameIndex;
use crate::payload::{Payload, PayloadError, ResultMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Frame {got} recorded out of order, expected frame {expected}")]
pub struct SequencingError {
    pub expected: FrameIndex,
    pub got: FrameIndex,
}

/// Builds the [`ResultMap`] of a run, one frame at a time.
///
/// Frames must be recorded exactly once each, in increasing order starting
/// at 0. Sealing consumes the accumulator, so a run produces one payload.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    results: ResultMap,
    next_index: FrameIndex,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        index: FrameIndex,
        boxes: Vec<BoundingBox>,
    ) -> Result<(), SequencingError> {
        if index != self.next_index {
            return Err(SequencingError {
                expected: self.next_index,
                got: index,
            });
        }
        self.results.insert(index, boxes);
        self.next_index += 1;
        Ok(())
    }

    /// Number of frames recorded so far.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Serializes everything recorded so far. Completeness is up to the caller.
    pub fn seal(self) -> Result<Payload, PayloadError> {
        Payload::encode(&self.results)
    }
}
