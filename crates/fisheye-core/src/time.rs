use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in time within the video stream.
///
/// The host delivers a monotonically increasing frame time; the render path
/// only ever derives the `time` uniform from it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp {
    /// Time in seconds from the start of the stream.
    seconds: f64,
}

impl Timestamp {
    /// Create a timestamp from seconds.
    pub fn from_seconds(s: f64) -> Self {
        Self {
            seconds: s.max(0.0),
        }
    }

    /// Create a timestamp from nanoseconds, the granularity hosts commonly
    /// report frame times in.
    pub fn from_nanos(ns: u64) -> Self {
        Self {
            seconds: ns as f64 / 1_000_000_000.0,
        }
    }

    /// Create a timestamp at the start (0.0).
    pub fn zero() -> Self {
        Self { seconds: 0.0 }
    }

    /// Get the time in seconds.
    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::zero()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_seconds() {
        let ts = Timestamp::from_seconds(1.5);
        assert!((ts.as_seconds() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_from_nanos() {
        let ts = Timestamp::from_nanos(1_500_000_000);
        assert!((ts.as_seconds() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_negative_clamped() {
        let ts = Timestamp::from_seconds(-3.0);
        assert_eq!(ts.as_seconds(), 0.0);
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(format!("{}", Timestamp::from_seconds(2.5)), "2.500s");
    }
}
