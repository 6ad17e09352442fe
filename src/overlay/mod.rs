//! Text overlay compositing.
//!
//! Draws a short label centred over a frame surface and returns a new flattened
//! surface of the same size. Surfaces use the lower-left origin described in
//! [`crate::encoder::convert`].

mod glyphs;

use image::{Rgba, RgbaImage};

use crate::assets::{LABEL_COLOR, LABEL_FONT_SIZE, LABEL_SHADOW};
use glyphs::{GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};

/// Fixed label style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    /// Cap height in pixels
    pub font_size: u32,
    pub color: [u8; 4],
    pub shadow: Option<[u8; 4]>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_size: LABEL_FONT_SIZE,
            color: LABEL_COLOR,
            shadow: Some(LABEL_SHADOW),
        }
    }
}

impl OverlayStyle {
    pub fn with_font_size(mut self, font_size: u32) -> Self {
        self.font_size = font_size;
        self
    }

    /// Integer glyph scale giving the closest cap height to `font_size`
    fn scale(&self) -> u32 {
        ((self.font_size + GLYPH_HEIGHT / 2) / GLYPH_HEIGHT).max(1)
    }
}

/// Stateless label compositor.
///
/// Each call starts from a copy of the input frame, so nothing drawn for one
/// frame can leak into the next.
#[derive(Debug, Clone, Default)]
pub struct OverlayCompositor {
    style: OverlayStyle,
}

impl OverlayCompositor {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Render `label` centred over `frame`.
    ///
    /// Text that does not fit is clipped at the surface edges, never wrapped.
    pub fn composite(&self, frame: &RgbaImage, label: &str) -> RgbaImage {
        let mut out = frame.clone();
        if label.is_empty() || out.width() == 0 || out.height() == 0 {
            return out;
        }

        let (x0, y0) = self.text_origin(out.width(), out.height(), label);
        if let Some(shadow) = self.style.shadow {
            self.draw_text(&mut out, label, x0 + 1, y0 + 1, shadow);
        }
        self.draw_text(&mut out, label, x0, y0, self.style.color);
        out
    }

    /// Bounding box size of `label` in pixels (width, height)
    pub fn text_size(&self, label: &str) -> (u32, u32) {
        let scale = self.style.scale();
        let chars = label.chars().count() as u32;
        if chars == 0 {
            return (0, 0);
        }
        (
            (chars * GLYPH_ADVANCE - (GLYPH_ADVANCE - GLYPH_WIDTH)) * scale,
            GLYPH_HEIGHT * scale,
        )
    }

    /// Top-left corner of the text box in picture coordinates
    fn text_origin(&self, width: u32, height: u32, label: &str) -> (i64, i64) {
        let (tw, th) = self.text_size(label);
        (
            (width as i64 - tw as i64) / 2,
            (height as i64 - th as i64) / 2,
        )
    }

    fn draw_text(&self, surface: &mut RgbaImage, label: &str, x0: i64, y0: i64, color: [u8; 4]) {
        let scale = self.style.scale() as i64;
        for (i, c) in label.chars().enumerate() {
            let rows = glyphs::glyph(c);
            let gx0 = x0 + i as i64 * GLYPH_ADVANCE as i64 * scale;
            for gy in 0..GLYPH_HEIGHT {
                for gx in 0..GLYPH_WIDTH {
                    if glyphs::is_set(rows, gx, gy) {
                        fill_block(
                            surface,
                            gx0 + gx as i64 * scale,
                            y0 + gy as i64 * scale,
                            scale,
                            color,
                        );
                    }
                }
            }
        }
    }
}

/// Fill a `size`x`size` block given in picture coordinates (top-left origin).
fn fill_block(surface: &mut RgbaImage, px: i64, py: i64, size: i64, color: [u8; 4]) {
    let (w, h) = (surface.width() as i64, surface.height() as i64);
    for y in py.max(0)..(py + size).min(h) {
        // surface rows run bottom-up
        let sy = (h - 1 - y) as u32;
        for x in px.max(0)..(px + size).min(w) {
            let dst = surface.get_pixel_mut(x as u32, sy);
            blend_pixel(dst, color);
        }
    }
}

fn blend_pixel(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let alpha = src[3] as u32;
    if alpha == 255 {
        dst.0 = [src[0], src[1], src[2], 255];
        return;
    }
    for c in 0..3 {
        dst.0[c] = ((src[c] as u32 * alpha + dst.0[c] as u32 * (255 - alpha)) / 255) as u8;
    }
    dst.0[3] = 255;
}
