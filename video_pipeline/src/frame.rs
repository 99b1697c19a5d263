use image::{Rgb, RgbImage};
use thiserror::Error;

/// Position of a frame in read order, starting at 0.
pub type FrameIndex = u64;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    InvalidBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A decoded video frame: a dense `height x width x 3` grid of RGB samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        let actual = data.len();
        let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::InvalidBuffer {
            width,
            height,
            expected,
            actual,
        })?;
        Ok(Self { image })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(rgb)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
