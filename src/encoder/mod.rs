//! Encoder module
//!
//! The pipeline hands composited frames to an [`EncoderSink`]. Sinks are
//! non-blocking: readiness is polled before every append, and the final flush
//! reports back asynchronously through a [`FlushNotifier`].

pub mod convert;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod threaded;
pub mod y4m;

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::pipeline::{MediaTime, SessionId};

pub use convert::{PixelBuffer, PixelBufferConverter, PixelFormat};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegWriter;
pub use threaded::ThreadedSink;
pub use y4m::Y4mWriter;

/// Lifecycle of a sink, stored in an `AtomicU8` by implementations
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Unknown = 0,
    Writing = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl SinkStatus {
    /// Convert from u8 value. Returns Failed for invalid values.
    #[inline]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SinkStatus::Unknown,
            1 => SinkStatus::Writing,
            2 => SinkStatus::Completed,
            4 => SinkStatus::Cancelled,
            _ => SinkStatus::Failed,
        }
    }
}

/// Outcome of a finished write, routed back to the session owner
#[derive(Debug, Clone)]
pub struct FlushSignal {
    pub session: SessionId,
    pub result: Result<PathBuf, String>,
}

/// Completion callback handed to [`EncoderSink::finish_writing`].
///
/// Cheap to clone. Notifying more than once is allowed; the receiver decides
/// which signal counts.
#[derive(Debug, Clone)]
pub struct FlushNotifier {
    session: SessionId,
    tx: mpsc::UnboundedSender<FlushSignal>,
}

impl FlushNotifier {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<FlushSignal>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn notify(&self, result: Result<PathBuf, String>) {
        let signal = FlushSignal {
            session: self.session,
            result,
        };
        if self.tx.send(signal).is_err() {
            log::debug!("Flush signal for session {} dropped: owner gone", self.session);
        }
    }
}

/// Destination for composited frames.
///
/// Every method returns immediately. A sink that cannot take a frame right now
/// reports `false` from [`EncoderSink::is_ready`] and the caller skips the
/// append; frames are never queued past the sink's own capacity.
pub trait EncoderSink: Send {
    fn status(&self) -> SinkStatus;

    /// Whether an append would be accepted right now
    fn is_ready(&self) -> bool;

    /// Open the output and move to [`SinkStatus::Writing`]
    fn start_writing(&mut self) -> anyhow::Result<()>;

    /// Anchor the output timeline at `at`
    fn start_session(&mut self, at: MediaTime);

    /// Queue one frame. Returns whether the sink accepted it.
    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> bool;

    /// Content after `at` is not part of the output
    fn end_session(&mut self, at: MediaTime);

    /// Flush asynchronously; `notifier` fires when the output is complete
    fn finish_writing(&mut self, notifier: FlushNotifier);

    /// Where the output is written
    fn output_path(&self) -> &Path;

    /// Detach from the output. Called exactly once, at teardown.
    fn release(&mut self);
}

/// Synchronous container writer driven by [`ThreadedSink`] on its own thread
pub trait FrameWriter {
    fn start_session(&mut self, _at: MediaTime) {}

    fn write_frame(&mut self, buffer: &PixelBuffer, at: MediaTime) -> anyhow::Result<()>;

    /// Flush and close the container, trimming or padding to `end` when given
    fn finish(&mut self, end: Option<MediaTime>) -> anyhow::Result<()>;
}
