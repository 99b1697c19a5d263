use crate::frame::{Frame, FrameError};
use opencv::{core::Mat, imgproc, prelude::*, videoio};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Video file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to open video {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("Failed to read frame {index}: {source}")]
    ReadFrameFailed { index: u64, source: opencv::Error },
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),
}

impl SourceError {
    /// True when the video could not be opened at all.
    pub fn is_open_error(&self) -> bool {
        matches!(self, SourceError::NotFound(_) | SourceError::Unreadable { .. })
    }
}

/// Sequential reader producing frames on demand.
///
/// `Ok(None)` marks the end of the stream. Once returned, every further call
/// returns `Ok(None)` as well.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Frame source backed by an OpenCV `VideoCapture` over a video file.
///
/// The capture is released at end of stream, on [`VideoFileSource::close`],
/// or when the source is dropped, whichever happens first.
pub struct VideoFileSource {
    path: PathBuf,
    capture: Option<videoio::VideoCapture>,
    frames_read: u64,
}

impl VideoFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }

        let unreadable = |reason: String| SourceError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| unreadable("path is not valid UTF-8".to_string()))?;
        let capture = videoio::VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(|e| unreadable(e.to_string()))?;
        if !capture.is_opened().map_err(|e| unreadable(e.to_string()))? {
            return Err(unreadable(
                "container or codec is not supported".to_string(),
            ));
        }

        let frame_count = capture.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        tracing::info!(
            path = %path.display(),
            frame_count,
            fps,
            "Opened video"
        );

        Ok(Self {
            path: path.to_path_buf(),
            capture: Some(capture),
            frames_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn is_closed(&self) -> bool {
        self.capture.is_none()
    }

    /// Releases the underlying capture. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!("Failed to release video {}: {:?}", self.path.display(), e);
            }
            tracing::debug!(
                path = %self.path.display(),
                frames_read = self.frames_read,
                "Released video"
            );
        }
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };

        let mut mat = Mat::default();
        let grabbed = match capture.read(&mut mat) {
            Ok(grabbed) => grabbed,
            Err(source) => {
                let index = self.frames_read;
                self.close();
                return Err(SourceError::ReadFrameFailed { index, source });
            }
        };

        if !grabbed || mat.empty() {
            self.close();
            return Ok(None);
        }

        let frame = mat_to_frame(&mat)?;
        self.frames_read += 1;
        Ok(Some(frame))
    }
}

impl Drop for VideoFileSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn mat_to_frame(bgr: &Mat) -> Result<Frame, SourceError> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;

    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let data = rgb.data_bytes()?.to_vec();
    Ok(Frame::from_rgb(width, height, data)?)
}
