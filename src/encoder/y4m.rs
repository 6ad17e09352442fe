//! YUV4MPEG2 container writer.
//!
//! Uncompressed 4:4:4 frames at a constant rate, BT.601 studio range. The
//! stream is constant frame rate, so every frame occupies the slot given by its
//! session-relative time: gaps repeat the previous picture, frames landing on an
//! already written slot are discarded, and the end time pads or trims the tail.
//! The most recent frame is held back until the next one arrives so that it can
//! still be trimmed by the end time.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{FrameWriter, PixelBuffer};
use crate::error::FrameError;
use crate::pipeline::MediaTime;

pub const FILE_EXTENSION: &str = "y4m";

pub struct Y4mWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    fps: i32,
    session_start: MediaTime,
    /// Next slot to be written to the stream
    next_slot: u64,
    /// Last picture written, as planar YUV
    last: Option<Vec<u8>>,
    held: Option<(u64, Vec<u8>)>,
    discarded: u64,
}

impl Y4mWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: i32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height }.into());
        }
        let fps = fps.max(1);
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "YUV4MPEG2 W{width} H{height} F{fps}:1 Ip A1:1 C444")?;

        Ok(Self {
            out,
            width,
            height,
            fps,
            session_start: MediaTime::ZERO,
            next_slot: 0,
            last: None,
            held: None,
            discarded: 0,
        })
    }

    /// Frames written to the stream so far
    pub fn frames_written(&self) -> u64 {
        self.next_slot
    }

    fn slot_of(&self, at: MediaTime) -> u64 {
        let rel = at.saturating_sub(self.session_start);
        rel.rescale(self.fps).value.max(0) as u64
    }

    /// Write `picture` at `slot`, repeating the previous picture over any gap
    fn emit(&mut self, slot: u64, picture: Vec<u8>) -> Result<()> {
        while self.next_slot < slot {
            let filler = self.last.as_deref().unwrap_or(&picture);
            put_frame(&mut self.out, filler)?;
            self.next_slot += 1;
        }
        put_frame(&mut self.out, &picture)?;
        self.next_slot += 1;
        self.last = Some(picture);
        Ok(())
    }

    fn to_yuv444(&self, buffer: &PixelBuffer) -> Result<Vec<u8>, FrameError> {
        if buffer.width() != self.width || buffer.height() != self.height {
            return Err(FrameError::DimensionMismatch {
                got_w: buffer.width(),
                got_h: buffer.height(),
                want_w: self.width,
                want_h: self.height,
            });
        }
        let plane = self.width as usize * self.height as usize;
        let mut yuv = vec![0u8; plane * 3];
        let (y_plane, chroma) = yuv.split_at_mut(plane);
        let (u_plane, v_plane) = chroma.split_at_mut(plane);

        let mut i = 0;
        for row in 0..self.height {
            for px in buffer.row(row).chunks_exact(3) {
                let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
                y_plane[i] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
                u_plane[i] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
                v_plane[i] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
                i += 1;
            }
        }
        Ok(yuv)
    }
}

fn put_frame(out: &mut BufWriter<File>, picture: &[u8]) -> std::io::Result<()> {
    out.write_all(b"FRAME\n")?;
    out.write_all(picture)
}

impl FrameWriter for Y4mWriter {
    fn start_session(&mut self, at: MediaTime) {
        self.session_start = at;
    }

    fn write_frame(&mut self, buffer: &PixelBuffer, at: MediaTime) -> Result<()> {
        let slot = self.slot_of(at);
        let taken = match &self.held {
            Some((held_slot, _)) => slot <= *held_slot,
            None => slot < self.next_slot,
        };
        if taken {
            self.discarded += 1;
            log::trace!("Y4M: frame at {} lands on slot {} already taken", at, slot);
            return Ok(());
        }

        let picture = self.to_yuv444(buffer)?;
        if let Some((held_slot, held)) = self.held.replace((slot, picture)) {
            self.emit(held_slot, held)?;
        }
        Ok(())
    }

    fn finish(&mut self, end: Option<MediaTime>) -> Result<()> {
        let end_slot = end.map(|at| self.slot_of(at));
        if let Some((slot, picture)) = self.held.take() {
            if end_slot.is_none_or(|end| slot < end) {
                self.emit(slot, picture)?;
            } else {
                self.discarded += 1;
            }
        }
        if let (Some(end), Some(last)) = (end_slot, self.last.take()) {
            while self.next_slot < end {
                put_frame(&mut self.out, &last)?;
                self.next_slot += 1;
            }
        }
        self.out.flush().context("Failed to flush Y4M stream")?;
        log::debug!(
            "Y4M: {} frames written, {} discarded",
            self.next_slot,
            self.discarded
        );
        Ok(())
    }
}
