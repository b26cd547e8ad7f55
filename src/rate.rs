/* src/rate.rs */

//! Rate descriptors: how many requests a bucket admits per refill period.

use std::fmt;
use std::time::Duration;

/// One minute, for building rates like `Rate::new(100, MINUTE)`.
pub const MINUTE: Duration = Duration::from_secs(60);
/// One hour.
pub const HOUR: Duration = Duration::from_secs(60 * 60);
/// One day.
pub const DAY: Duration = Duration::from_secs(60 * 60 * 24);

/// An immutable (capacity, refill period) pair.
///
/// `capacity` is both the ceiling a bucket can hold and the most tokens a
/// single refill tick may add, so a fully drained bucket is whole again one
/// period after its last gift. Two rates are equal iff both fields are equal,
/// and that structural equality is what decides whether two routes share a
/// refill daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    capacity: u32,
    period: Duration,
}

impl Rate {
    /// Builds a rate of `capacity` requests per `period`, e.g.
    /// `Rate::new(500, HOUR)` for 500 requests an hour.
    ///
    /// Zero capacity or a zero period make a rate that can never admit
    /// anything sensibly; both are rejected by config validation rather than
    /// here, so a `Config` reports every problem at once.
    pub fn new(capacity: u32, period: Duration) -> Self {
        Self { capacity, period }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.capacity, self.period)
    }
}
