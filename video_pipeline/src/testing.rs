//! In-memory stand-ins for the video file, the model and the consumer.

use crate::{
    consumer::{Consumer, ConsumerError},
    detector::{BoundingBox, Detection, Detector, DetectorError},
    frame::Frame,
    frame_source::{FrameSource, SourceError},
    payload::Payload,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub struct MemorySource {
    frames: VecDeque<Frame>,
    fail_at: Option<u64>,
    read: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            fail_at: None,
            read: 0,
        }
    }

    pub fn blank(count: usize) -> Self {
        Self::new(vec![Frame::filled(8, 6, [0, 0, 0]); count])
    }

    /// Frame `i` is filled with red level `i * 3 mod 256`.
    pub fn gradient(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| Frame::filled(8, 6, [(i * 3 % 256) as u8, 0, 0]))
                .collect(),
        )
    }

    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.fail_at == Some(self.read) {
            self.frames.clear();
            return Err(SourceError::ReadFrameFailed {
                index: self.read,
                source: opencv::Error::new(opencv::core::StsError, "corrupt packet"),
            });
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.read += 1;
        }
        Ok(frame)
    }
}

enum Script {
    ByBrightness,
    PerFrame(Vec<Vec<BoundingBox>>),
    MovingObject,
}

type ErrorFactory = Box<dyn Fn() -> DetectorError + Send>;

pub struct ScriptedDetector {
    script: Script,
    calls: usize,
    reclaims: usize,
    fail_at: Option<(usize, ErrorFactory)>,
}

impl ScriptedDetector {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: 0,
            reclaims: 0,
            fail_at: None,
        }
    }

    /// Deterministic in the frame content: one box when the red level is
    /// even, none otherwise.
    pub fn by_brightness() -> Self {
        Self::with_script(Script::ByBrightness)
    }

    /// Returns the `n`-th list on the `n`-th call.
    pub fn from_frames(frames: Vec<Vec<BoundingBox>>) -> Self {
        Self::with_script(Script::PerFrame(frames))
    }

    /// One object drifting right by 4 pixels per frame.
    pub fn moving_object() -> Self {
        Self::with_script(Script::MovingObject)
    }

    pub fn failing_at(
        mut self,
        call: usize,
        error: impl Fn() -> DetectorError + Send + 'static,
    ) -> Self {
        self.fail_at = Some((call, Box::new(error)));
        self
    }

    pub fn reclaims(&self) -> usize {
        self.reclaims
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        if let Some((call, error)) = &self.fail_at {
            if *call == self.calls {
                return Err(error());
            }
        }

        let boxes = match &self.script {
            Script::ByBrightness => {
                let level = frame.image().get_pixel(0, 0).0[0] as f32;
                if level as u32 % 2 == 0 {
                    vec![BoundingBox::new(level, level / 2., level + 10., level + 20.)]
                } else {
                    vec![]
                }
            }
            Script::PerFrame(frames) => frames.get(self.calls).cloned().unwrap_or_default(),
            Script::MovingObject => {
                let x = self.calls as f32 * 4.;
                vec![BoundingBox::new(x, 10., x + 50., 60.)]
            }
        };
        self.calls += 1;

        Ok(boxes
            .into_iter()
            .map(|bbox| Detection::new(bbox, 0, 0.9))
            .collect())
    }

    fn reclaim(&mut self) {
        self.reclaims += 1;
    }
}

/// Consumer that keeps every payload it accepts.
#[derive(Clone, Default)]
pub struct CollectingConsumer {
    accepted: Arc<Mutex<Vec<Payload>>>,
}

impl CollectingConsumer {
    pub fn accepted(&self) -> Vec<Payload> {
        self.accepted
            .lock()
            .map(|accepted| accepted.clone())
            .unwrap_or_default()
    }
}

impl Consumer for CollectingConsumer {
    fn accept(&mut self, payload: Payload) -> Result<(), ConsumerError> {
        payload.decode()?;
        if let Ok(mut accepted) = self.accepted.lock() {
            accepted.push(payload);
        }
        Ok(())
    }
}
