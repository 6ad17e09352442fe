//! Health metrics for the frame pipeline

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session frame counters
///
/// Tracks what happened to every frame delivered to the controller. All fields
/// use atomic operations so observers can read them from other threads.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Frames delivered by the capture source
    pub frames_received: AtomicU64,

    /// Frames dropped before counting (data not ready, sink not writing)
    pub frames_unavailable: AtomicU64,

    /// Frames counted but skipped because the sink was not ready
    pub frames_skipped: AtomicU64,

    /// Frames that failed conversion or compositing
    pub conversion_failures: AtomicU64,

    /// Frames handed to the sink and accepted
    pub frames_appended: AtomicU64,

    /// Frames handed to the sink and refused
    pub append_rejections: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.frames_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the updated failure count
    pub fn record_conversion_failure(&self) -> u64 {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_appended(&self) {
        self.frames_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.append_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_appended(&self) -> u64 {
        self.frames_appended.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    /// Percentage of counted frames that never reached the file
    pub fn loss_rate(&self) -> f64 {
        let appended = self.frames_appended();
        let counted = appended
            + self.frames_skipped()
            + self.conversion_failures.load(Ordering::Relaxed)
            + self.append_rejections.load(Ordering::Relaxed);
        if counted == 0 {
            return 0.0;
        }
        ((counted - appended) as f64 / counted as f64) * 100.0
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_unavailable,
            &self.frames_skipped,
            &self.conversion_failures,
            &self.frames_appended,
            &self.append_rejections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_unavailable: self.frames_unavailable.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped(),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            frames_appended: self.frames_appended(),
            append_rejections: self.append_rejections.load(Ordering::Relaxed),
            loss_rate: self.loss_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub frames_received: u64,
    pub frames_unavailable: u64,
    pub frames_skipped: u64,
    pub conversion_failures: u64,
    pub frames_appended: u64,
    pub append_rejections: u64,
    pub loss_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames received, {} appended, {} skipped ({:.2}% lost), {} unavailable, {} conversion failures, {} rejected",
            self.frames_received,
            self.frames_appended,
            self.frames_skipped,
            self.loss_rate,
            self.frames_unavailable,
            self.conversion_failures,
            self.append_rejections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate() {
        let health = PipelineHealth::new();
        assert_eq!(health.loss_rate(), 0.0);

        for _ in 0..3 {
            health.record_appended();
        }
        health.record_skipped();
        assert!((health.loss_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_clears_counters() {
        let health = PipelineHealth::new();
        health.record_received();
        health.record_appended();
        health.record_conversion_failure();
        health.reset();
        assert_eq!(health.summary(), HealthSummary::default());
    }
}
