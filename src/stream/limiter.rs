//! Preview cadence control

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Stamp meaning no tick has been admitted yet.
const NEVER: u64 = u64::MAX;

const MIN_RATE_HZ: u32 = 1;
const MAX_RATE_HZ: u32 = 60;

/// Decimating rate gate for preview delivery.
///
/// Pure pass/drop: no queueing, no timers, no delay of a frame that is
/// due. `admit` answers whether the configured interval has elapsed since
/// the last admitted tick; on false the caller drops the tick and the
/// newest frame stays reachable through the slot, so nothing is lost but
/// an earlier repaint.
pub struct RateGate {
    /// Reference point for the microsecond stamps below.
    epoch: Instant,
    /// Minimum spacing between admitted ticks, microseconds.
    interval_us: AtomicU64,
    /// Stamp of the last admitted tick.
    last_us: AtomicU64,
}

impl RateGate {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            epoch: Instant::now(),
            interval_us: AtomicU64::new(interval_us(rate_hz)),
            last_us: AtomicU64::new(NEVER),
        }
    }

    /// Change the target rate; clamped to 1..=60 per second.
    pub fn set_rate(&self, rate_hz: u32) {
        self.interval_us
            .store(interval_us(rate_hz), Ordering::Relaxed);
    }

    /// True when the tick at `now` should be forwarded.
    ///
    /// Admissions stay at least one interval apart even under racing
    /// callers: exactly one racer wins each window, the rest see the
    /// fresh stamp and drop.
    pub fn admit(&self, now: Instant) -> bool {
        let now_us = now.saturating_duration_since(self.epoch).as_micros() as u64;
        let interval = self.interval_us.load(Ordering::Relaxed);
        loop {
            let last = self.last_us.load(Ordering::Relaxed);
            if last != NEVER && now_us.saturating_sub(last) < interval {
                return false;
            }
            match self
                .last_us
                .compare_exchange_weak(last, now_us, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

fn interval_us(rate_hz: u32) -> u64 {
    1_000_000 / u64::from(rate_hz.clamp(MIN_RATE_HZ, MAX_RATE_HZ))
}
