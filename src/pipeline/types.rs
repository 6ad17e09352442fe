//! Core types for the pipeline system

use std::cmp::Ordering;
use std::time::Duration;

use crate::encoder::PixelBuffer;

/// Rational presentation time: `value / timescale` seconds.
///
/// The timescale is always positive. Comparison is exact across timescales.
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a new time. A non-positive timescale is clamped to 1.
    pub const fn new(value: i64, timescale: i32) -> Self {
        let timescale = if timescale > 0 { timescale } else { 1 };
        Self { value, timescale }
    }

    /// Time of `frames` frames at `frame_rate` frames per second
    pub fn from_frames(frames: u64, frame_rate: i32) -> Self {
        Self::new(frames as i64, frame_rate)
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Convert to duration, clamping negative times to zero
    pub fn as_duration(&self) -> Duration {
        if self.value <= 0 {
            return Duration::ZERO;
        }
        let nanos = self.value as i128 * 1_000_000_000 / self.timescale as i128;
        Duration::from_nanos(nanos.min(u64::MAX as i128) as u64)
    }

    /// Express this time in another timescale, rounding to the nearest tick.
    pub fn rescale(&self, timescale: i32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let num = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        Self::new(rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64, timescale)
    }

    /// `self - other`, never below zero.
    ///
    /// The result uses the least common timescale of both operands when it fits,
    /// otherwise the finer of the two.
    pub fn saturating_sub(self, other: MediaTime) -> Self {
        let timescale = common_timescale(self.timescale, other.timescale);
        let a = self.rescale(timescale);
        let b = other.rescale(timescale);
        let diff = a.value.saturating_sub(b.value);
        Self::new(diff.max(0), timescale)
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

fn common_timescale(a: i32, b: i32) -> i32 {
    if a == b {
        return a;
    }
    let lcm = a as i64 / gcd(a as i64, b as i64) * b as i64;
    if lcm <= i32::MAX as i64 {
        lcm as i32
    } else {
        a.max(b)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs().max(1)
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

/// Identifies one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A composited frame in encoder-native format, tagged with its session-relative
/// presentation time. Ownership moves to the sink on append.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub buffer: PixelBuffer,
    pub pts: MediaTime,
}
