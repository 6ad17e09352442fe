//! Per-frame orchestration
//!
//! The controller is the single writer of [`PipelineState`]. It runs on the
//! session's serialized processing context, one frame at a time, and never
//! waits on the sink: readiness is checked and the frame is skipped otherwise.

use std::sync::Arc;

use super::clock::TimestampTracker;
use super::health::PipelineHealth;
use super::types::MediaTime;
use crate::capture::CaptureFrame;
use crate::encoder::{EncoderSink, PixelBufferConverter, SinkStatus};
use crate::overlay::OverlayCompositor;

/// Mutable state of one session's frame pipeline.
///
/// `anchor` is `None` exactly when `frame_count == 0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub frame_count: u64,
    pub anchor: Option<MediaTime>,
    pub session_active: bool,
}

/// What happened to one delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Discarded before counting: no active session, data not ready, or the
    /// sink is not writing
    Dropped,
    /// Counted, but the sink was not ready
    Skipped,
    /// Counted and accepted by the sink
    Appended,
    /// Counted, handed to the sink and refused
    Rejected,
    /// Counted, but conversion or compositing failed
    ConversionFailed,
}

impl Disposition {
    pub fn is_counted(&self) -> bool {
        !matches!(self, Disposition::Dropped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub disposition: Disposition,
    /// Set on the one frame that pushes the count past the budget: the
    /// session must end at this time.
    pub finalize_at: Option<MediaTime>,
}

impl FrameOutcome {
    pub(crate) fn dropped() -> Self {
        Self {
            disposition: Disposition::Dropped,
            finalize_at: None,
        }
    }
}

pub struct FrameController {
    state: PipelineState,
    clock: TimestampTracker,
    compositor: OverlayCompositor,
    converter: PixelBufferConverter,
    health: Arc<PipelineHealth>,
    frame_budget: u64,
    frame_rate: i32,
}

impl FrameController {
    pub fn new(
        converter: PixelBufferConverter,
        compositor: OverlayCompositor,
        frame_budget: u64,
        frame_rate: i32,
    ) -> Self {
        Self {
            state: PipelineState::default(),
            clock: TimestampTracker::new(),
            compositor,
            converter,
            health: Arc::new(PipelineHealth::new()),
            frame_budget,
            frame_rate: frame_rate.max(1),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn frame_count(&self) -> u64 {
        self.state.frame_count
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        self.health.clone()
    }

    /// Start counting for a new session
    pub fn begin(&mut self) {
        self.reset();
        self.health.reset();
        self.state.session_active = true;
    }

    /// Clear the counter and anchor. Health counters are kept for the report.
    pub fn reset(&mut self) {
        self.state = PipelineState::default();
        self.clock.reset();
    }

    /// Process one delivered frame against `sink`.
    pub fn on_frame(&mut self, frame: &CaptureFrame, sink: &mut dyn EncoderSink) -> FrameOutcome {
        self.health.record_received();

        if !self.state.session_active {
            log::trace!("Frame at {} arrived outside an active session", frame.pts);
            self.health.record_unavailable();
            return FrameOutcome::dropped();
        }
        if !frame.data_ready {
            log::trace!("Frame at {} not ready, dropped", frame.pts);
            self.health.record_unavailable();
            return FrameOutcome::dropped();
        }
        let status = sink.status();
        if status != SinkStatus::Writing {
            log::debug!("Sink is {:?}, frame at {} dropped", status, frame.pts);
            self.health.record_unavailable();
            return FrameOutcome::dropped();
        }

        let offset = self.clock.on_frame(frame.pts);
        if self.state.anchor.is_none() {
            self.state.anchor = self.clock.anchor();
        }

        let disposition = if sink.is_ready() {
            self.encode(frame, offset, sink)
        } else {
            log::trace!("Sink not ready, frame {} skipped", self.state.frame_count);
            self.health.record_skipped();
            Disposition::Skipped
        };

        self.state.frame_count += 1;

        let mut finalize_at = None;
        if self.state.frame_count > self.frame_budget {
            self.state.session_active = false;
            finalize_at = Some(MediaTime::new(
                self.state.frame_count as i64 - 1,
                self.frame_rate,
            ));
        }

        FrameOutcome {
            disposition,
            finalize_at,
        }
    }

    fn encode(
        &self,
        frame: &CaptureFrame,
        offset: MediaTime,
        sink: &mut dyn EncoderSink,
    ) -> Disposition {
        let label = self.state.frame_count.to_string();
        let buffer = self
            .converter
            .to_image(frame)
            .map(|image| self.compositor.composite(&image, &label))
            .and_then(|image| self.converter.to_encoder_buffer(&image));

        match buffer {
            Ok(buffer) => {
                if sink.append(buffer, offset) {
                    self.health.record_appended();
                    Disposition::Appended
                } else {
                    log::debug!("Sink refused frame {} at {}", label, offset);
                    self.health.record_rejected();
                    Disposition::Rejected
                }
            }
            Err(e) => {
                let failures = self.health.record_conversion_failure();
                if failures == 1 || failures % 30 == 0 {
                    log::warn!("Frame {} dropped: {} ({} so far)", label, e, failures);
                }
                Disposition::ConversionFailed
            }
        }
    }
}
