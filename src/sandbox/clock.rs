use std::time::{Duration, Instant};

/// Monotonic deadline that can be armed once, either up front or lazily.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutClock {
    limit: Duration,
    deadline: Option<Instant>,
}

impl TimeoutClock {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            deadline: None,
        }
    }

    pub fn armed_at(limit: Duration, now: Instant) -> Self {
        let mut clock = Self::new(limit);
        clock.arm(now);
        clock
    }

    /// Start counting from `now`. Re-arming an armed clock is a no-op; returns
    /// whether this call armed it.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.limit);
        true
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time left before expiry, or `None` while unarmed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}
