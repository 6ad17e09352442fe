//! Frame pipeline for framestamp
//!
//! Capture frames flow through a single serialized context:
//! - `controller`: per-frame readiness check, overlay, re-timing, append, counting
//! - `session`: source/sink pairing, finalization and exactly-once teardown
//! - `clock`: session-relative timestamps anchored at the first frame
//! - `state`: session lifecycle state machine
//! - `health`: per-session frame counters

pub mod clock;
pub mod controller;
pub mod health;
pub mod session;
pub mod state;
pub mod types;

pub use clock::TimestampTracker;
pub use controller::{Disposition, FrameController, FrameOutcome, PipelineState};
pub use health::{HealthSummary, PipelineHealth};
pub use session::{SessionFactory, SessionManager, SessionReport};
pub use state::SessionState;
pub use types::{EncodedFrame, MediaTime, SessionId};
