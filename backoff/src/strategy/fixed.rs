use std::time::Duration;

/// Yields the same delay forever. Bound it with [`Iterator::take`] to cap the number of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    duration: Duration,
}

impl Interval {
    pub fn from_millis(millis: u64) -> Interval {
        Interval {
            duration: Duration::from_millis(millis),
        }
    }
}

impl From<Duration> for Interval {
    fn from(duration: Duration) -> Self {
        Interval { duration }
    }
}

impl Iterator for Interval {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}
