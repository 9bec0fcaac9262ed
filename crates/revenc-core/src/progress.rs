//! Progress throttling.
//!
//! Rate-limits edits to a job's status message so the chat platform
//! is never asked for more than one edit per interval per job.

use std::time::{Duration, Instant};

use crate::config::STATUS_EDIT_INTERVAL;

/// Rate-limiter for status message edits.
///
/// Ensures edits are not emitted more frequently than the configured
/// interval; the caller simply drops updates when `should_emit`
/// returns false.
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    /// Create a new throttle with the specified minimum interval.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    /// Create a throttle with the status-edit default interval.
    #[must_use]
    pub const fn status_edit() -> Self {
        Self::new(STATUS_EDIT_INTERVAL)
    }

    /// Check if enough time has passed to emit another update.
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Force the next check to return true.
    pub const fn reset(&mut self) {
        self.last_emit = None;
    }

    /// Push the next emit out by at least `delay`.
    ///
    /// Used when the platform returns a rate-limit hint larger than
    /// the regular interval.
    pub fn hold_for(&mut self, delay: Duration) {
        let resume = Instant::now() + delay.saturating_sub(self.min_interval);
        self.last_emit = Some(resume);
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::status_edit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emit_always_passes() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        assert!(throttle.should_emit());
    }

    #[test]
    fn respects_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());

        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.should_emit());
    }

    #[test]
    fn reset_allows_immediate_emit() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        throttle.should_emit();
        assert!(!throttle.should_emit());

        throttle.reset();
        assert!(throttle.should_emit());
    }

    #[test]
    fn hold_for_suppresses_past_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(10));
        throttle.should_emit();
        throttle.hold_for(Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!throttle.should_emit());
    }
}
