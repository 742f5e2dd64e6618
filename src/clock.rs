use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Process-wide coarse clock. The frame's main loop refreshes it on every
/// tick; actors read it lock-free instead of issuing their own syscalls.
#[derive(Debug)]
pub struct Clock {
    secs: AtomicU64,
    us: AtomicU64,
}

impl Clock {
    pub fn now() -> Self {
        let clock = Self {
            secs: AtomicU64::new(0),
            us: AtomicU64::new(0),
        };
        clock.refresh();
        clock
    }

    pub fn refresh(&self) {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.secs.store(since_epoch.as_secs(), Ordering::Relaxed);
        self.us.store(since_epoch.as_micros() as u64, Ordering::Relaxed);
    }

    /// Whole seconds since the unix epoch.
    #[inline]
    pub fn unix_secs(&self) -> u64 {
        self.secs.load(Ordering::Relaxed)
    }

    /// Microseconds since the unix epoch.
    #[inline]
    pub fn us_tick(&self) -> u64 {
        self.us.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn advance_us(&self, delta_us: u64) {
        let us = self.us.fetch_add(delta_us, Ordering::Relaxed) + delta_us;
        self.secs.store(us / 1_000_000, Ordering::Relaxed);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::now()
    }
}
