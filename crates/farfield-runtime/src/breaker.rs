use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Rolling count of unexpected request failures. The count decays to zero
/// once no fault has been recorded for `reset_after`.
#[derive(Debug)]
pub struct CircuitBreaker {
    count: AtomicU32,
    last_fault_ms: AtomicU64,
    threshold: u32,
    reset_after: Duration,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            count: AtomicU32::new(0),
            last_fault_ms: AtomicU64::new(0),
            threshold,
            reset_after,
            epoch: Instant::now(),
        }
    }

    #[inline]
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Counts one fault; true when the count went over the threshold, in
    /// which case the count starts again from zero.
    pub fn record_fault(&self) -> bool {
        self.last_fault_ms.store(self.now_ms(), Ordering::Release);
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if n > self.threshold {
            self.count.store(0, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn maybe_reset(&self) {
        if self.count.load(Ordering::Acquire) == 0 {
            return;
        }
        let last = self.last_fault_ms.load(Ordering::Acquire);
        if self.now_ms().saturating_sub(last) >= self.reset_after.as_millis() as u64 {
            self.count.store(0, Ordering::Release);
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}
