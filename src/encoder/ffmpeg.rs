use ac_ffmpeg::codec::video::{VideoEncoder, VideoFrameMut};
use ac_ffmpeg::codec::{Encoder, video};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::path::Path;

use super::{FrameWriter, PixelBuffer, PixelFormat};
use crate::pipeline::MediaTime;

pub const FILE_EXTENSION: &str = "mov";

/// Encoder fallback chain for the QuickTime container.
///
/// Both encoders take RGB input directly, so no colour conversion happens
/// before encoding.
const ENCODER_CHAIN: &[(&str, &[(&str, &str)])] = &[
    (
        "libx264rgb",
        &[
            ("preset", "fast"),
            ("crf", "18"),
            ("threads", "0"),
            ("bframes", "0"),
        ],
    ),
    // QuickTime Animation, lossless and always built in
    ("qtrle", &[]),
];

const TIME_BASE_DEN: i32 = 90_000;

/// H.264 (or QuickTime RLE) writer into a `.mov` file
pub struct FfmpegWriter {
    encoder: VideoEncoder,
    /// Taken by `finish`, which writes the container trailer
    muxer: Option<Muxer<File>>,
    pixel_format: video::frame::PixelFormat,
    time_base: TimeBase,
    w: usize,
    h: usize,
    session_start: MediaTime,
    last_pts: Option<i64>,
    /// Most recent frame, held until the end time is known
    held: Option<(PixelBuffer, i64)>,
    pub codec_name: String,
}

impl FfmpegWriter {
    pub fn create(path: &Path, w: u32, h: u32) -> Result<Self> {
        let (w, h) = (w as usize, h as usize);
        let time_base = TimeBase::new(1, TIME_BASE_DEN);
        let pixel_format = video::frame::get_pixel_format(PixelFormat::Rgb24.ffmpeg_name());

        let (encoder, codec_name) = Self::try_create_encoder(w, h, time_base, pixel_format)?;
        log::info!("Using encoder: {}", codec_name);

        let name = path
            .to_str()
            .ok_or_else(|| anyhow!("Output path is not valid UTF-8: {}", path.display()))?;
        let format = OutputFormat::guess_from_file_name(name)
            .ok_or_else(|| anyhow!("No container format for {}", path.display()))?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let io = IO::from_seekable_write_stream(file);

        let mut builder = Muxer::builder();
        builder.add_stream(&encoder.codec_parameters().into())?;
        let muxer = builder.build(io, format)?;

        Ok(Self {
            encoder,
            muxer: Some(muxer),
            pixel_format,
            time_base,
            w,
            h,
            session_start: MediaTime::ZERO,
            last_pts: None,
            held: None,
            codec_name,
        })
    }

    fn try_create_encoder(
        w: usize,
        h: usize,
        time_base: TimeBase,
        pixel_format: video::frame::PixelFormat,
    ) -> Result<(VideoEncoder, String)> {
        for (codec, options) in ENCODER_CHAIN {
            let mut builder = match VideoEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    log::debug!("Encoder {} not available, skipping: {}", codec, e);
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(w)
                .height(h)
                .time_base(time_base);
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            match builder.build() {
                Ok(enc) => return Ok((enc, codec.to_string())),
                Err(e) => {
                    log::debug!("Encoder {} failed to initialize: {}", codec, e);
                    continue;
                }
            }
        }
        Err(anyhow!(
            "No RGB video encoder available, install FFmpeg with libx264 or qtrle"
        ))
    }

    fn drain(&mut self) -> Result<()> {
        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| anyhow!("Recording already finished"))?;
        while let Some(packet) = self.encoder.take()? {
            muxer.push(packet.with_stream_index(0))?;
        }
        Ok(())
    }

    fn encode(&mut self, buffer: &PixelBuffer, pts: i64) -> Result<()> {
        let mut frame = VideoFrameMut::black(self.pixel_format, self.w, self.h)
            .with_time_base(self.time_base);
        self.copy_rows(&mut frame, buffer);
        let frame = frame
            .freeze()
            .with_pts(Timestamp::new(pts, self.time_base));

        self.encoder.push(frame)?;
        self.drain()
    }

    fn copy_rows(&self, frame: &mut VideoFrameMut, buffer: &PixelBuffer) {
        let mut planes = frame.planes_mut();
        let plane = planes[0].data_mut();
        let line_size = plane.len() / self.h;
        let row_len = (self.w * 3).min(line_size);
        for y in 0..self.h.min(buffer.height() as usize) {
            let src = buffer.row(y as u32);
            let dst = &mut plane[y * line_size..y * line_size + row_len];
            dst.copy_from_slice(&src[..row_len.min(src.len())]);
        }
    }
}

impl FrameWriter for FfmpegWriter {
    fn start_session(&mut self, at: MediaTime) {
        self.session_start = at;
    }

    fn write_frame(&mut self, buffer: &PixelBuffer, at: MediaTime) -> Result<()> {
        if buffer.width() as usize != self.w || buffer.height() as usize != self.h {
            return Err(anyhow!(
                "frame is {}x{}, encoder expects {}x{}",
                buffer.width(),
                buffer.height(),
                self.w,
                self.h
            ));
        }

        let pts = at.saturating_sub(self.session_start).rescale(TIME_BASE_DEN).value;
        // encoders reject non-increasing timestamps
        if self.last_pts.is_some_and(|last| pts <= last) {
            log::trace!("FFmpeg: frame at {} is not after the previous one", at);
            return Ok(());
        }
        self.last_pts = Some(pts);

        match self.held.replace((buffer.clone(), pts)) {
            Some((held, held_pts)) => self.encode(&held, held_pts),
            None => Ok(()),
        }
    }

    fn finish(&mut self, end: Option<MediaTime>) -> Result<()> {
        let start = self.session_start;
        let end_pts = end.map(|at| at.saturating_sub(start).rescale(TIME_BASE_DEN).value);
        if let Some((held, pts)) = self.held.take() {
            if end_pts.is_none_or(|end| pts < end) {
                self.encode(&held, pts)?;
            } else {
                log::debug!("FFmpeg: last frame at {} trimmed by session end", pts);
            }
        }
        self.encoder.flush()?;
        self.drain()?;

        // the moov index is only written on close
        if let Some(muxer) = self.muxer.take() {
            muxer.close().context("Failed to write container trailer")?;
        }
        Ok(())
    }
}
