use bytes::Bytes;
use image::GrayImage;
use std::time::SystemTime;

/// A single encoded JPEG frame as produced by the streaming encoder.
///
/// Only the most recent frame is ever retained by the streaming layer;
/// every write replaces the previous one.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded JPEG bytes (shared ownership, cheap to clone)
    pub data: Bytes,
    /// Time the frame was produced
    pub timestamp: SystemTime,
}

impl Frame {
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        Self {
            data: data.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Raw 8-bit grayscale frame pulled from the camera's lores stream.
///
/// The lores buffer may carry trailing padding; `data` is truncated to
/// exactly `width * height` bytes on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl LumaFrame {
    pub fn new(width: u32, height: u32, mut data: Vec<u8>) -> Self {
        data.truncate((width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// Uniform frame, mostly useful for synthetic test sequences.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width * height) as usize],
        }
    }

    /// View as a `GrayImage`. None when the buffer is short of
    /// `width * height` bytes.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}
