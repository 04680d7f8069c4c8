use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A coarse, monotonically increasing tick source used to bucket queue and
/// execution latency into the histograms in [`crate::stats::Statistics`].
///
/// Kept as a trait rather than calling `Instant::now()` directly so tests
/// can drive the histograms with a [`FakeHeartbeat`] instead of depending on
/// real elapsed wall-clock time.
pub trait HeartbeatClock: Send + Sync {
    fn tick(&self) -> u64;
}

const RESOLUTION_MS: u64 = 100;

/// Ticks once per [`RESOLUTION_MS`] milliseconds of elapsed wall-clock time
/// since construction.
pub struct RealHeartbeat {
    epoch: Instant,
}

impl RealHeartbeat {
    pub fn new() -> RealHeartbeat {
        RealHeartbeat { epoch: Instant::now() }
    }
}

impl Default for RealHeartbeat {
    fn default() -> RealHeartbeat {
        RealHeartbeat::new()
    }
}

impl HeartbeatClock for RealHeartbeat {
    fn tick(&self) -> u64 {
        (self.epoch.elapsed().as_millis() as u64) / RESOLUTION_MS
    }
}

/// A tick source a test can advance by hand, for deterministic coverage of
/// the queue/exec-time histograms without sleeping real time away.
#[derive(Default)]
pub struct FakeHeartbeat(AtomicU64);

impl FakeHeartbeat {
    pub fn new() -> FakeHeartbeat {
        FakeHeartbeat(AtomicU64::new(0))
    }

    pub fn advance(&self, ticks: u64) {
        self.0.fetch_add(ticks, Ordering::Relaxed);
    }
}

impl HeartbeatClock for FakeHeartbeat {
    fn tick(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fake_heartbeat_advances_on_demand() {
        let hb = FakeHeartbeat::new();
        assert_eq!(hb.tick(), 0);
        hb.advance(3);
        assert_eq!(hb.tick(), 3);
    }
}
