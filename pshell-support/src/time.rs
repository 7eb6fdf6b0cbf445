use std::time::{Duration, Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// A monotonic deadline, used instead of reusing a single `timeval` across
/// `select` iterations (spec.md §9, open question on stale-reply timing).
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    #[inline]
    pub fn after(timeout: Duration) -> Deadline {
        Deadline {
            at: Instant::now() + timeout,
        }
    }

    /// Remaining time budget, `None` once the deadline has passed.
    #[inline]
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if now >= self.at {
            None
        } else {
            Some(self.at - now)
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.remaining().is_none()
    }
}
