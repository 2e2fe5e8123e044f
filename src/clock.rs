//! Monotonic session clock
//!
//! Timestamps in access and event logs are nanoseconds since a shared
//! origin. Both logs are stamped from the same clock so an access and an
//! event recorded in one session can be placed on a single time axis.

use std::time::{Duration, Instant};

/// Monotonic nanosecond clock anchored at a session origin
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    /// Start a new clock at the current instant
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the origin
    ///
    /// Saturates at `u64::MAX` (roughly 584 years of capture).
    #[inline]
    pub fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Wall time elapsed since the origin
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// The instant this clock measures from
    pub fn origin(&self) -> Instant {
        self.origin
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn test_clock_elapsed_tracks_sleep() {
        let clock = SessionClock::start();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.now_nanos() >= 5_000_000);
        assert!(clock.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_copies_share_origin() {
        let clock = SessionClock::start();
        let copy = clock;
        assert_eq!(clock.origin(), copy.origin());
    }
}
