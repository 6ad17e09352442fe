use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::assets::{
    FRAME_BUDGET, FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH, LABEL_FONT_SIZE, LIBRARY_DIR_NAME,
    SINK_QUEUE_DEPTH,
};

/// Container writer behind the encoder sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Uncompressed YUV4MPEG2, no native dependencies
    Y4m,
    /// FFmpeg `.mov`, needs the `ffmpeg` feature
    Ffmpeg,
}

impl EncoderKind {
    pub fn file_extension(&self) -> &'static str {
        match self {
            EncoderKind::Y4m => crate::encoder::y4m::FILE_EXTENSION,
            EncoderKind::Ffmpeg => "mov",
        }
    }
}

impl Default for EncoderKind {
    fn default() -> Self {
        if cfg!(feature = "ffmpeg") {
            EncoderKind::Ffmpeg
        } else {
            EncoderKind::Y4m
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub width: u32,
    pub height: u32,
    pub frame_rate: i32,
    /// Counted frames after which the session is finalized
    pub frame_budget: u64,
    pub label_font_size: u32,
    /// Frames the sink may hold in flight before reporting not ready
    pub sink_queue_depth: usize,
    /// Where recordings are written while a session runs
    pub output_dir: PathBuf,
    /// Where finished recordings are moved
    pub library_dir: PathBuf,
    pub encoder: EncoderKind,
}

impl Default for Config {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Config {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            frame_rate: FRAME_RATE,
            frame_budget: FRAME_BUDGET,
            label_font_size: LABEL_FONT_SIZE,
            sink_queue_depth: SINK_QUEUE_DEPTH,
            library_dir: tmp.join(LIBRARY_DIR_NAME),
            output_dir: tmp,
            encoder: EncoderKind::default(),
        }
    }
}

impl Config {
    /// Defaults, overridden by the JSON file at `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("Frame size must be non-zero, got {}x{}", self.width, self.height);
        }
        if self.frame_rate <= 0 {
            bail!("Frame rate must be positive, got {}", self.frame_rate);
        }
        if self.frame_budget == 0 {
            bail!("Frame budget must be at least 1");
        }
        if self.sink_queue_depth == 0 {
            bail!("Sink queue depth must be at least 1");
        }
        if self.encoder == EncoderKind::Ffmpeg && !cfg!(feature = "ffmpeg") {
            bail!("The ffmpeg encoder needs a build with the `ffmpeg` feature");
        }
        Ok(())
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
