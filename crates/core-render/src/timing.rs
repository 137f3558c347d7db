//! Paint duration bookkeeping: last sample plus a running mean.

use std::time::Duration;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    samples: u64,
    total: Duration,
    last: Duration,
}

impl FrameTiming {
    pub fn record(&mut self, elapsed: Duration) {
        self.samples += 1;
        self.total = self.total.saturating_add(elapsed);
        self.last = elapsed;
    }

    pub fn last(&self) -> Duration {
        self.last
    }

    pub fn average(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        let per = self.total.as_nanos() / u128::from(self.samples);
        Duration::from_nanos(u64::try_from(per).unwrap_or(u64::MAX))
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}
