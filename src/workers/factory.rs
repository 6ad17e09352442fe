//! Default session wiring: synthetic capture into a file-backed sink

use anyhow::{Context, Result};
use std::path::PathBuf;
use uuid::Uuid;

use crate::capture::{CaptureSource, SyntheticCapture};
use crate::config::{Config, EncoderKind};
use crate::encoder::{EncoderSink, PixelBufferConverter, ThreadedSink, Y4mWriter};
use crate::overlay::{OverlayCompositor, OverlayStyle};
use crate::pipeline::{FrameController, SessionFactory, SessionId};

/// Frame controller configured for `config`
pub fn controller_for(config: &Config) -> Result<FrameController> {
    let converter = PixelBufferConverter::new(config.width, config.height)?;
    let compositor =
        OverlayCompositor::new(OverlayStyle::default().with_font_size(config.label_font_size));
    Ok(FrameController::new(
        converter,
        compositor,
        config.frame_budget,
        config.frame_rate,
    ))
}

pub struct RecordingFactory {
    config: Config,
}

impl RecordingFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Fresh, unique output file for one session
    fn output_path(&self, id: SessionId) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let unique = Uuid::new_v4().simple().to_string();
        self.config.output_dir.join(format!(
            "framestamp-{}-{}-{}.{}",
            stamp,
            id.0,
            &unique[..8],
            self.config.encoder.file_extension()
        ))
    }

    fn sink(&self, path: PathBuf) -> Result<Box<dyn EncoderSink>> {
        let (w, h, fps) = (self.config.width, self.config.height, self.config.frame_rate);
        let depth = self.config.sink_queue_depth;
        match self.config.encoder {
            EncoderKind::Y4m => Ok(Box::new(ThreadedSink::new(path, depth, move |p| {
                Y4mWriter::create(p, w, h, fps)
            }))),
            #[cfg(feature = "ffmpeg")]
            EncoderKind::Ffmpeg => Ok(Box::new(ThreadedSink::new(path, depth, move |p| {
                crate::encoder::FfmpegWriter::create(p, w, h)
            }))),
            #[cfg(not(feature = "ffmpeg"))]
            EncoderKind::Ffmpeg => {
                anyhow::bail!("The ffmpeg encoder needs a build with the `ffmpeg` feature")
            }
        }
    }
}

impl SessionFactory for RecordingFactory {
    fn create(&mut self, id: SessionId) -> Result<(Box<dyn CaptureSource>, Box<dyn EncoderSink>)> {
        std::fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!("Failed to create {}", self.config.output_dir.display())
        })?;
        let path = self.output_path(id);
        let sink = self.sink(path)?;
        let source = Box::new(SyntheticCapture::new(
            self.config.width,
            self.config.height,
            self.config.frame_rate,
        ));
        Ok((source, sink))
    }
}
