//! Conversion between raw capture frames, overlay surfaces and encoder buffers.
//!
//! Capture frames are packed BGRA with the origin at the top-left corner. The
//! overlay surface (`RgbaImage`) follows the drawing-surface convention of a
//! lower-left origin, so its first row is the bottom of the picture. Encoder
//! buffers are packed RGB24 with a top-left origin. Both directions therefore
//! flip the picture vertically.
//!
//! Every call allocates a fresh buffer. There is no pooling.

use bytes::Bytes;
use image::RgbaImage;

use crate::capture::CaptureFrame;
use crate::error::FrameError;

/// Pixel layout of an encoder buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }

    /// FFmpeg name of this layout
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

/// Encoder-native picture
#[derive(Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Bytes,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Row `y`, counted from the top of the picture
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// Uniform RGB picture with tightly packed rows
    #[cfg(test)]
    pub(crate) fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            stride: width as usize * 3,
            format: PixelFormat::Rgb24,
            data: Bytes::from(data),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let row = self.row(y);
        let i = x as usize * 3;
        [row[i], row[i + 1], row[i + 2]]
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Converts frames for a fixed encode size
#[derive(Debug, Clone, Copy)]
pub struct PixelBufferConverter {
    width: u32,
    height: u32,
}

impl PixelBufferConverter {
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    /// Raw BGRA capture frame to an overlay surface (lower-left origin).
    pub fn to_image(&self, frame: &CaptureFrame) -> Result<RgbaImage, FrameError> {
        self.check_dimensions(frame.width, frame.height)?;

        let w = self.width as usize;
        let h = self.height as usize;
        let row_bytes = w * 4;
        if frame.stride < row_bytes {
            return Err(FrameError::ShortBuffer {
                len: frame.stride,
                needed: row_bytes,
            });
        }
        // a malformed stride must not overflow the size check
        let needed = frame
            .stride
            .checked_mul(h - 1)
            .and_then(|n| n.checked_add(row_bytes))
            .ok_or(FrameError::ShortBuffer {
                len: frame.data.len(),
                needed: usize::MAX,
            })?;
        if frame.data.len() < needed {
            return Err(FrameError::ShortBuffer {
                len: frame.data.len(),
                needed,
            });
        }

        let mut out = try_alloc(row_bytes * h)?;
        for y in 0..h {
            let src = &frame.data[y * frame.stride..y * frame.stride + row_bytes];
            let dst_start = (h - 1 - y) * row_bytes;
            let dst = &mut out[dst_start..dst_start + row_bytes];
            for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
                d[3] = 255;
            }
        }

        RgbaImage::from_raw(self.width, self.height, out).ok_or(FrameError::ShortBuffer {
            len: 0,
            needed: row_bytes * h,
        })
    }

    /// Overlay surface to a packed RGB24 encoder buffer (top-left origin).
    ///
    /// Alpha is discarded.
    pub fn to_encoder_buffer(&self, image: &RgbaImage) -> Result<PixelBuffer, FrameError> {
        self.check_dimensions(image.width(), image.height())?;

        let w = self.width as usize;
        let h = self.height as usize;
        let src_row = w * 4;
        let stride = w * PixelFormat::Rgb24.bytes_per_pixel();
        let raw = image.as_raw();

        let mut out = try_alloc(stride * h)?;
        for sy in 0..h {
            let src = &raw[sy * src_row..(sy + 1) * src_row];
            let dst_start = (h - 1 - sy) * stride;
            let dst = &mut out[dst_start..dst_start + stride];
            for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(3)) {
                d.copy_from_slice(&s[..3]);
            }
        }

        Ok(PixelBuffer {
            width: self.width,
            height: self.height,
            stride,
            format: PixelFormat::Rgb24,
            data: Bytes::from(out),
        })
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }
        if width != self.width || height != self.height {
            return Err(FrameError::DimensionMismatch {
                got_w: width,
                got_h: height,
                want_w: self.width,
                want_h: self.height,
            });
        }
        Ok(())
    }
}

fn try_alloc(len: usize) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| FrameError::Allocation { bytes: len })?;
    buf.resize(len, 0);
    Ok(buf)
}
