/// Transfer rates at or above this are treated as "no limit".
pub const SPEED_UNLIMITED: u32 = 3 * 1024 * 1024 * 1024;

/// Sliding per-second transfer counters over the last `N` seconds.
/// Gaps between samples are zero-filled so idle time drags the average
/// down like it should.
pub struct SpeedSample<const N: usize = 16> {
    read: [u32; N],
    written: [u32; N],
    last_secs: u64,
    cursor: usize,
}

impl<const N: usize> SpeedSample<N> {
    pub fn new() -> Self {
        Self {
            read: [0; N],
            written: [0; N],
            last_secs: 0,
            cursor: 0,
        }
    }

    /// Accounts `read`/`written` bytes against the second `now_secs`.
    pub fn sample(&mut self, now_secs: u64, read: u32, written: u32) {
        if now_secs != self.last_secs {
            let gap = (now_secs.saturating_sub(self.last_secs) as usize).min(N);
            for _ in 0..gap {
                self.cursor = (self.cursor + 1) % N;
                self.read[self.cursor] = 0;
                self.written[self.cursor] = 0;
            }
            self.last_secs = now_secs;
        }
        self.read[self.cursor] = self.read[self.cursor].saturating_add(read);
        self.written[self.cursor] = self.written[self.cursor].saturating_add(written);
    }

    /// Bytes accounted in the current second.
    pub fn cur(&self) -> (u32, u32) {
        (self.read[self.cursor], self.written[self.cursor])
    }

    /// Average bytes per second over the last `secs` seconds.
    pub fn avg(&self, secs: usize) -> (u32, u32) {
        let secs = secs.clamp(1, N);
        let mut read: u64 = 0;
        let mut written: u64 = 0;
        for i in 0..secs {
            let at = (self.cursor + N - i) % N;
            read += self.read[at] as u64;
            written += self.written[at] as u64;
        }
        ((read / secs as u64) as u32, (written / secs as u64) as u32)
    }
}

impl<const N: usize> Default for SpeedSample<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_within_second() {
        let mut s: SpeedSample<4> = SpeedSample::new();
        s.sample(100, 10, 20);
        s.sample(100, 5, 5);
        assert_eq!(s.cur(), (15, 25));
    }

    #[test]
    fn gap_zero_fills() {
        let mut s: SpeedSample<4> = SpeedSample::new();
        s.sample(100, 400, 0);
        s.sample(104, 0, 0);
        // The burst fell off the window entirely.
        assert_eq!(s.avg(4), (0, 0));
    }

    #[test]
    fn average_over_window() {
        let mut s: SpeedSample<4> = SpeedSample::new();
        for t in 0..4u64 {
            s.sample(100 + t, 100, 200);
        }
        assert_eq!(s.avg(4), (100, 200));
        assert_eq!(s.avg(2), (100, 200));
    }
}
