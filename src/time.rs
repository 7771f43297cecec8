//! Real-time values and conversions between frame counts and wall-clock time.

use std::fmt;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A time instant or duration as (seconds, nanoseconds).
///
/// Always normalised so that `nsec` has the same sign as `sec` and a
/// magnitude below one second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RealTime {
    sec: i32,
    nsec: i32,
}

impl RealTime {
    /// Construct from a seconds/nanoseconds pair, normalising the fields.
    pub fn new(sec: i32, nsec: i32) -> Self {
        let total = i64::from(sec) * NANOS_PER_SEC + i64::from(nsec);
        Self::from_nanos(total)
    }

    /// The zero time.
    pub fn zero() -> Self {
        Self { sec: 0, nsec: 0 }
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self::from_nanos((seconds * NANOS_PER_SEC as f64).round() as i64)
    }

    fn from_nanos(total: i64) -> Self {
        Self {
            sec: (total / NANOS_PER_SEC) as i32,
            nsec: (total % NANOS_PER_SEC) as i32,
        }
    }

    pub fn seconds(&self) -> i32 {
        self.sec
    }

    pub fn nanoseconds(&self) -> i32 {
        self.nsec
    }

    pub fn to_seconds(self) -> f64 {
        f64::from(self.sec) + f64::from(self.nsec) / NANOS_PER_SEC as f64
    }

    pub fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// Convert a frame count at the given sample rate to a real time.
    pub fn from_frame(frame: i64, sample_rate: u32) -> Self {
        let rate = i64::from(sample_rate);
        if rate == 0 {
            return Self::zero();
        }
        let sec = frame / rate;
        let rem = frame % rate;
        let nsec = ((rem as f64 / rate as f64) * NANOS_PER_SEC as f64).round() as i64;
        Self::from_nanos(sec * NANOS_PER_SEC + nsec)
    }

    /// Convert this time to a frame count at the given sample rate,
    /// rounding to the nearest frame.
    pub fn to_frame(self, sample_rate: u32) -> i64 {
        (self.to_seconds() * f64::from(sample_rate)).round() as i64
    }
}

impl fmt::Display for RealTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.to_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx_eq::assert_approx_eq;

    #[test]
    fn test_normalisation() {
        let t = RealTime::new(1, 1_500_000_000);
        assert_eq!(t.seconds(), 2);
        assert_eq!(t.nanoseconds(), 500_000_000);

        let t = RealTime::new(-1, -1_500_000_000);
        assert_eq!(t.seconds(), -2);
        assert_eq!(t.nanoseconds(), -500_000_000);
    }

    #[test]
    fn test_frame_round_trip_at_vertices() {
        for &rate in &[22_050u32, 44_100, 48_000] {
            for &frame in &[0i64, 1, 1023, 44_100, 123_456] {
                let t = RealTime::from_frame(frame, rate);
                assert_eq!(t.to_frame(rate), frame, "rate {rate} frame {frame}");
            }
        }
    }

    #[test]
    fn test_from_seconds() {
        let t = RealTime::from_seconds(1.5);
        assert_eq!(t.seconds(), 1);
        assert_eq!(t.nanoseconds(), 500_000_000);
        assert_approx_eq!(t.to_seconds(), 1.5, 1e-9);
    }

    #[test]
    fn test_ordering() {
        let a = RealTime::new(1, 0);
        let b = RealTime::new(1, 1);
        let c = RealTime::new(2, 0);
        assert!(a < b);
        assert!(b < c);
    }
}
