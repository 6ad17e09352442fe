//! Traits for capture sources

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::CaptureFrame;

/// A push-style producer of raw frames.
///
/// Frames are delivered on the channel handed to [`CaptureSource::start`]; the
/// consumer processes them serially. Sources must never block on a full
/// channel: a frame that cannot be delivered is discarded.
#[async_trait]
pub trait CaptureSource: Send {
    /// Frame size in pixels (width, height)
    fn resolution(&self) -> (u32, u32);

    /// Nominal delivery rate in frames per second
    fn nominal_fps(&self) -> i32;

    /// Begin producing frames into `output`.
    async fn start(&mut self, output: mpsc::Sender<CaptureFrame>) -> Result<(), anyhow::Error>;

    /// Stop producing frames. Takes effect immediately; a frame already in
    /// flight may still be delivered.
    async fn stop(&mut self) -> Result<(), anyhow::Error>;

    /// Detach every input and output endpoint. Called exactly once, at teardown.
    fn release(&mut self);
}
