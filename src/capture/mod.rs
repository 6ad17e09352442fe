//! Capture module
//!
//! Defines the raw frame type delivered by capture sources and the source
//! interface the session drives. Device configuration is left to the source
//! implementation; the pipeline only consumes the frame stream.

mod synthetic;
mod traits;

use bytes::Bytes;

use crate::pipeline::MediaTime;

/// Raw captured frame: packed BGRA, top-left origin.
///
/// Read-only to the pipeline. The pixel data is reference counted, so cloning a
/// frame does not copy pixels.
#[derive(Clone)]
pub struct CaptureFrame {
    /// Presentation timestamp on the capture device clock
    pub pts: MediaTime,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
    pub data: Bytes,
    /// False while the source is still filling the frame
    pub data_ready: bool,
}

impl CaptureFrame {
    pub fn new(pts: MediaTime, width: u32, height: u32, stride: usize, data: Bytes) -> Self {
        Self {
            pts,
            width,
            height,
            stride,
            data,
            data_ready: true,
        }
    }

    /// Mark the frame data as not yet available
    pub fn pending(mut self) -> Self {
        self.data_ready = false;
        self
    }

    /// Solid-colour frame with tightly packed rows
    pub fn solid(pts: MediaTime, width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let stride = width as usize * 4;
        let mut data = Vec::with_capacity(stride * height as usize);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgra);
        }
        Self::new(pts, width, height, stride, Bytes::from(data))
    }
}

impl std::fmt::Debug for CaptureFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureFrame")
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("size", &self.data.len())
            .field("data_ready", &self.data_ready)
            .finish()
    }
}

pub use synthetic::SyntheticCapture;
pub use traits::CaptureSource;
