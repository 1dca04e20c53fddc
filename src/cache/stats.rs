use std::sync::atomic::{AtomicU64, Ordering};

/// Immutable snapshot of cache performance statistics.
///
/// Instances are produced by [`StatsCounter::snapshot`] and combine with
/// saturating arithmetic, so long-running counters never wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    hit_count: u64,
    miss_count: u64,
    load_success_count: u64,
    load_exception_count: u64,
    total_load_time_micros: u64,
    eviction_count: u64,
}

impl CacheStats {
    pub fn new(
        hit_count: u64,
        miss_count: u64,
        load_success_count: u64,
        load_exception_count: u64,
        total_load_time_micros: u64,
        eviction_count: u64,
    ) -> Self {
        Self {
            hit_count,
            miss_count,
            load_success_count,
            load_exception_count,
            total_load_time_micros,
            eviction_count,
        }
    }

    /// Number of reads served from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Number of reads that missed.
    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    /// Number of loader runs that produced a value.
    pub fn load_success_count(&self) -> u64 {
        self.load_success_count
    }

    /// Number of loader runs that failed.
    pub fn load_exception_count(&self) -> u64 {
        self.load_exception_count
    }

    /// Total time spent in the loader, in microseconds.
    pub fn total_load_time_micros(&self) -> u64 {
        self.total_load_time_micros
    }

    /// Number of entries evicted by size, weight or expiry.
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Fraction of requests that hit; 1.0 when no requests were made.
    pub fn hit_rate(&self) -> f64 {
        match self.request_count() {
            0 => 1.0,
            requests => self.hit_count as f64 / requests as f64,
        }
    }

    /// Fraction of requests that missed; 0.0 when no requests were made.
    pub fn miss_rate(&self) -> f64 {
        match self.request_count() {
            0 => 0.0,
            requests => self.miss_count as f64 / requests as f64,
        }
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count
            .saturating_add(self.load_exception_count)
    }

    /// Fraction of loads that failed; 0.0 when no loads ran.
    pub fn load_exception_rate(&self) -> f64 {
        match self.load_count() {
            0 => 0.0,
            loads => self.load_exception_count as f64 / loads as f64,
        }
    }

    /// Average loader time in microseconds; 0.0 when no loads ran.
    pub fn average_load_penalty(&self) -> f64 {
        match self.load_count() {
            0 => 0.0,
            loads => self.total_load_time_micros as f64 / loads as f64,
        }
    }

    /// Component-wise sum.
    pub fn plus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_add(other.hit_count),
            miss_count: self.miss_count.saturating_add(other.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_add(other.load_success_count),
            load_exception_count: self
                .load_exception_count
                .saturating_add(other.load_exception_count),
            total_load_time_micros: self
                .total_load_time_micros
                .saturating_add(other.total_load_time_micros),
            eviction_count: self.eviction_count.saturating_add(other.eviction_count),
        }
    }

    /// Component-wise difference, floored at zero.
    pub fn minus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_sub(other.hit_count),
            miss_count: self.miss_count.saturating_sub(other.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_sub(other.load_success_count),
            load_exception_count: self
                .load_exception_count
                .saturating_sub(other.load_exception_count),
            total_load_time_micros: self
                .total_load_time_micros
                .saturating_sub(other.total_load_time_micros),
            eviction_count: self.eviction_count.saturating_sub(other.eviction_count),
        }
    }
}

/// Accumulator of cache events, installed by
/// [`record_stats`](crate::cache::CacheBuilder::record_stats).
pub trait StatsCounter: Send + Sync {
    fn record_hits(&self, count: u64);
    fn record_misses(&self, count: u64);
    fn record_load_success(&self, load_time_micros: u64);
    fn record_load_exception(&self, load_time_micros: u64);
    fn record_eviction(&self);
    fn snapshot(&self) -> CacheStats;
}

/// Thread-safe counting implementation of [`StatsCounter`].
#[derive(Debug, Default)]
pub struct SimpleStatsCounter {
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    load_success_count: AtomicU64,
    load_exception_count: AtomicU64,
    total_load_time_micros: AtomicU64,
    eviction_count: AtomicU64,
}

impl StatsCounter for SimpleStatsCounter {
    fn record_hits(&self, count: u64) {
        self.hit_count.fetch_add(count, Ordering::Relaxed);
    }

    fn record_misses(&self, count: u64) {
        self.miss_count.fetch_add(count, Ordering::Relaxed);
    }

    fn record_load_success(&self, load_time_micros: u64) {
        self.load_success_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_micros
            .fetch_add(load_time_micros, Ordering::Relaxed);
    }

    fn record_load_exception(&self, load_time_micros: u64) {
        self.load_exception_count.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_micros
            .fetch_add(load_time_micros, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats::new(
            self.hit_count.load(Ordering::Relaxed),
            self.miss_count.load(Ordering::Relaxed),
            self.load_success_count.load(Ordering::Relaxed),
            self.load_exception_count.load(Ordering::Relaxed),
            self.total_load_time_micros.load(Ordering::Relaxed),
            self.eviction_count.load(Ordering::Relaxed),
        )
    }
}

/// Discards everything; used when stats recording is off.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NoopStatsCounter;

impl StatsCounter for NoopStatsCounter {
    fn record_hits(&self, _count: u64) {}
    fn record_misses(&self, _count: u64) {}
    fn record_load_success(&self, _load_time_micros: u64) {}
    fn record_load_exception(&self, _load_time_micros: u64) {}
    fn record_eviction(&self) {}
    fn snapshot(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_rates() {
        let stats = CacheStats::default();
        assert_eq!(1.0, stats.hit_rate());
        assert_eq!(0.0, stats.miss_rate());
        assert_eq!(0.0, stats.load_exception_rate());
        assert_eq!(0.0, stats.average_load_penalty());
    }

    #[test]
    fn rates_and_counts() {
        let stats = CacheStats::new(3, 1, 2, 2, 100, 5);
        assert_eq!(4, stats.request_count());
        assert_eq!(0.75, stats.hit_rate());
        assert_eq!(0.25, stats.miss_rate());
        assert_eq!(4, stats.load_count());
        assert_eq!(0.5, stats.load_exception_rate());
        assert_eq!(25.0, stats.average_load_penalty());
    }

    #[test]
    fn plus_saturates_and_minus_floors() {
        let a = CacheStats::new(u64::MAX, 1, 0, 0, 0, 0);
        let b = CacheStats::new(2, 3, 0, 0, 0, 0);
        assert_eq!(u64::MAX, a.plus(&b).hit_count());
        assert_eq!(4, a.plus(&b).miss_count());
        let diff = b.minus(&a);
        assert_eq!(0, diff.hit_count());
        assert_eq!(2, diff.miss_count());
    }

    #[test]
    fn simple_counter_accumulates() {
        let counter = SimpleStatsCounter::default();
        counter.record_hits(2);
        counter.record_misses(1);
        counter.record_load_success(30);
        counter.record_load_exception(10);
        counter.record_eviction();
        let stats = counter.snapshot();
        assert_eq!(CacheStats::new(2, 1, 1, 1, 40, 1), stats);
    }
}
