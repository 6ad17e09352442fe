//! Session-relative timestamps for encoded frames

use super::types::MediaTime;

/// Derives encode timestamps from capture timestamps.
///
/// The encoder session starts at time zero while capture timestamps come from
/// the device clock, so every frame is re-timed against the first frame seen
/// (the anchor). The anchor is set exactly once per session.
#[derive(Debug, Default, Clone)]
pub struct TimestampTracker {
    anchor: Option<MediaTime>,
    last: Option<MediaTime>,
}

impl TimestampTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capture timestamp and return its offset from the anchor.
    ///
    /// The first call stores `capture_pts` as the anchor and returns zero. Later
    /// calls return `capture_pts - anchor`, clamped at zero if capture time runs
    /// backwards.
    pub fn on_frame(&mut self, capture_pts: MediaTime) -> MediaTime {
        let offset = match self.anchor {
            None => {
                self.anchor = Some(capture_pts);
                MediaTime::new(0, capture_pts.timescale)
            }
            Some(anchor) => capture_pts.saturating_sub(anchor),
        };

        if let Some(last) = self.last {
            if capture_pts < last {
                log::trace!("capture pts regressed: {} < {}", capture_pts, last);
            }
        }
        self.last = Some(capture_pts);
        offset
    }

    pub fn anchor(&self) -> Option<MediaTime> {
        self.anchor
    }

    /// Forget the anchor so the next frame starts a new time base
    pub fn reset(&mut self) {
        self.anchor = None;
        self.last = None;
    }
}
