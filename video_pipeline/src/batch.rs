use crate::frame::{Frame, FrameIndex};
use crate::frame_source::{FrameSource, SourceError};
use std::iter::FusedIterator;

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Consecutively read frames, processed together before a reclamation point.
#[derive(Debug)]
pub struct Batch {
    first_index: FrameIndex,
    frames: Vec<Frame>,
}

impl Batch {
    pub fn first_index(&self) -> FrameIndex {
        self.first_index
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Yields each frame together with its index in the video.
    pub fn into_indexed(self) -> impl Iterator<Item = (FrameIndex, Frame)> {
        (self.first_index..).zip(self.frames)
    }
}

/// Lazy, finite sequence of frame batches drawn from a [`FrameSource`].
///
/// Each batch holds up to `chunk_size` frames; the last one may be shorter.
/// The sequence ends once the source reports end of stream, or right after
/// yielding a read error. Frame indices run contiguously from 0 across batches.
pub struct Batches<S> {
    source: S,
    chunk_size: usize,
    next_index: FrameIndex,
    exhausted: bool,
}

impl<S: FrameSource> Batches<S> {
    pub fn new(source: S, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            exhausted: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of frames handed out so far.
    pub fn frames_read(&self) -> u64 {
        self.next_index
    }
}

impl<S: FrameSource> Iterator for Batches<S> {
    type Item = Result<Batch, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let mut frames = Vec::with_capacity(self.chunk_size);
        while frames.len() < self.chunk_size {
            match self.source.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        if frames.is_empty() {
            return None;
        }

        let batch = Batch {
            first_index: self.next_index,
            frames,
        };
        self.next_index += batch.len() as u64;
        Some(Ok(batch))
    }
}

impl<S: FrameSource> FusedIterator for Batches<S> {}
