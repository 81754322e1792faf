use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Approximate count of sessions out of a pool, with min/max watermarks.
///
/// Each counter sits on its own cache line since acquire and release hit them
/// from every executor. The values are for reporting only.
#[derive(Debug, Default)]
pub struct UsageStats {
    used: CachePadded<AtomicUsize>,
    min: CachePadded<AtomicUsize>,
    max: CachePadded<AtomicUsize>,
}

impl UsageStats {
    /// Record a session leaving the pool.
    pub fn increment(&self) {
        let used = self.used.fetch_add(1, Ordering::Relaxed) + 1;
        self.max.fetch_max(used, Ordering::Relaxed);
    }

    /// Record a session coming back.
    pub fn decrement(&self) {
        let previous = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)))
            .unwrap_or_else(|v| v);
        self.min.fetch_min(previous.saturating_sub(1), Ordering::Relaxed);
    }

    /// Sessions currently out of the pool.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Low watermark since the last reset.
    pub fn min_used(&self) -> usize {
        self.min.load(Ordering::Relaxed)
    }

    /// High watermark since the last reset.
    pub fn max_used(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }

    /// Set both watermarks to the current usage.
    pub fn reset(&self) {
        let used = self.used();
        self.min.store(used, Ordering::Relaxed);
        self.max.store(used, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermarks() {
        let usage = UsageStats::default();
        usage.increment();
        usage.increment();
        usage.increment();
        usage.decrement();
        assert_eq!(usage.used(), 2);
        assert_eq!(usage.max_used(), 3);
        assert_eq!(usage.min_used(), 0);

        usage.reset();
        assert_eq!((usage.min_used(), usage.max_used()), (2, 2));
        usage.decrement();
        assert_eq!(usage.min_used(), 1);
        assert_eq!(usage.max_used(), 2);
    }

    #[test]
    fn test_decrement_saturates() {
        let usage = UsageStats::default();
        usage.decrement();
        assert_eq!(usage.used(), 0);
    }
}
