use std::time::Duration;

use crossbeam::utils::Backoff;

/// Idle-wait escalation for actor host loops: spin, then yield, then
/// short bounded sleeps. Reset on any progress so a busy actor never
/// pays the sleep latency.
pub struct IdleBackoff {
    spin: Backoff,
    max_sleep: Duration,
}

impl IdleBackoff {
    pub fn new(max_sleep: Duration) -> Self {
        Self {
            spin: Backoff::new(),
            max_sleep,
        }
    }

    /// One idle wait step. Spins and yields first; once that is
    /// exhausted, sleeps for the capped interval.
    #[inline]
    pub fn wait(&mut self) {
        if self.spin.is_completed() {
            std::thread::sleep(self.max_sleep);
        } else {
            self.spin.snooze();
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.spin = Backoff::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn spins_before_sleeping() {
        let mut bo = IdleBackoff::new(Duration::from_millis(50));
        let start = Instant::now();
        // The first few waits are spin/yield steps, far below the sleep cap.
        for _ in 0..3 {
            bo.wait();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn reset_restarts_escalation() {
        let mut bo = IdleBackoff::new(Duration::from_millis(1));
        while !bo.spin.is_completed() {
            bo.wait();
        }
        bo.reset();
        assert!(!bo.spin.is_completed());
    }
}
