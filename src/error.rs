//! Typed errors for the frame pipeline and the session lifecycle.
//!
//! Per-frame errors never leave the pipeline controller; session errors are the
//! only ones reported to the caller.

use thiserror::Error;

use crate::pipeline::state::SessionState;

/// Failure while converting or compositing a single frame.
///
/// The frame is dropped and the pipeline keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Width or height is zero
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Frame does not match the configured encode size
    #[error("frame is {got_w}x{got_h}, encoder expects {want_w}x{want_h}")]
    DimensionMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    /// Pixel buffer could not be allocated
    #[error("failed to allocate a {bytes} byte pixel buffer")]
    Allocation { bytes: usize },

    /// Raw frame carries fewer bytes than its geometry requires
    #[error("frame data too short: {len} bytes, need {needed}")]
    ShortBuffer { len: usize, needed: usize },
}

/// Failure surfaced at the session level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Request not allowed in the current lifecycle state
    #[error("invalid request while session is {state}")]
    InvalidState { state: SessionState },

    /// Source or sink could not be created or started
    #[error("session setup failed: {0}")]
    Setup(String),

    /// Sink failed to flush the recording
    #[error("finalization failed: {0}")]
    Finalize(String),

    /// Persistence collaborator rejected the recording
    #[error("persistence failed: {0}")]
    Persist(String),

    /// The recorder task is gone
    #[error("recorder is not running")]
    Closed,
}
