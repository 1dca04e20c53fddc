use std::fmt;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;

use likely_stable::unlikely;
use once_cell::sync::OnceCell;

use crate::clock::{Clock, StdClock};
use crate::error::RateLimited;
use crate::smooth::{Policy, SmoothState};

/// A smooth token-bucket rate limiter.
///
/// A limiter distributes permits at a configurable rate. Each
/// [`acquire`](Self::acquire) blocks until a permit is available and then
/// takes it; permits do not need to be released. The limiter charges the cost
/// of each request forward: a caller that finds permits available returns
/// immediately, and the caller after it pays the wait. This yields smooth
/// long-run throughput without queuing.
///
/// Two modes are available:
///
/// - [`bursty`](Self::bursty): idle time banks permits (up to
///   `max_burst_seconds` worth) which a later burst may spend with no wait.
/// - [`warming_up`](Self::warming_up): after idle time the limiter is *cold*
///   and serves permits up to `cold_factor` times slower than the stable
///   rate, ramping back to stable as the backlog of stored permits drains.
///
/// All operations are thread-safe. Reservation happens under a per-instance
/// lock; the sleep that follows is performed with the lock released, so slow
/// sleepers do not block other acquirers from reserving their own slots.
///
/// # Examples
///
/// ```rust
/// use sluice::RateLimiter;
///
/// let limiter = RateLimiter::bursty(100.0);
/// for task in 0..3 {
///     limiter.acquire_one();
///     // ... at most 100 of these per second ...
///     let _ = task;
/// }
/// ```
pub struct RateLimiter<C = StdClock> {
    clock: C,
    seed: Policy,
    state: OnceCell<Mutex<SmoothState>>,
}

impl RateLimiter<StdClock> {
    /// Creates a bursty limiter serving `permits_per_second`, able to bank up
    /// to one second of unused permits, timed by the system clock.
    ///
    /// # Panics
    ///
    /// Panics unless `permits_per_second` is positive and finite.
    pub fn bursty(permits_per_second: f64) -> Self {
        Self::bursty_with_clock(permits_per_second, 1.0, StdClock::default())
    }

    /// Creates a warming-up limiter serving `permits_per_second` once warm,
    /// with a cold factor of 3, timed by the system clock.
    ///
    /// The limiter starts cold and serves the first permits slowly; it also
    /// returns to cold after idling for `warmup_period`.
    ///
    /// # Panics
    ///
    /// Panics unless `permits_per_second` is positive and finite.
    pub fn warming_up(permits_per_second: f64, warmup_period: Duration) -> Self {
        Self::warming_up_with_clock(permits_per_second, warmup_period, 3.0, StdClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Creates a bursty limiter with an explicit burst window and clock.
    pub fn bursty_with_clock(permits_per_second: f64, max_burst_seconds: f64, clock: C) -> Self {
        let limiter = Self {
            clock,
            seed: Policy::Bursty { max_burst_seconds },
            state: OnceCell::new(),
        };
        limiter.set_rate(permits_per_second);
        limiter
    }

    /// Creates a warming-up limiter with an explicit cold factor and clock.
    ///
    /// # Panics
    ///
    /// Panics if `cold_factor < 1.0` or the rate is not positive and finite.
    pub fn warming_up_with_clock(
        permits_per_second: f64,
        warmup_period: Duration,
        cold_factor: f64,
        clock: C,
    ) -> Self {
        assert!(
            cold_factor >= 1.0,
            "cold factor must be at least 1.0, got {cold_factor}"
        );
        let limiter = Self {
            clock,
            seed: Policy::WarmingUp {
                warmup_period_micros: warmup_period.as_micros() as u64,
                cold_factor,
                threshold_permits: 0.0,
                slope: 0.0,
            },
            state: OnceCell::new(),
        };
        limiter.set_rate(permits_per_second);
        limiter
    }

    /// The state mutex, published lazily on first access.
    fn state(&self) -> &Mutex<SmoothState> {
        self.state
            .get_or_init(|| Mutex::new(SmoothState::new(self.seed)))
    }

    /// Updates the stable rate of this limiter.
    ///
    /// Currently banked permits are preserved proportionally to the change in
    /// capacity, and outstanding debt carries over: callers already waiting
    /// keep their reservations.
    ///
    /// # Panics
    ///
    /// Panics unless `permits_per_second` is positive and finite.
    pub fn set_rate(&self, permits_per_second: f64) {
        assert!(
            permits_per_second > 0.0 && permits_per_second.is_finite(),
            "rate must be positive and finite, got {permits_per_second}"
        );
        let mut state = self.state().lock().unwrap();
        state.set_rate(permits_per_second, self.clock.now_micros());
    }

    /// The stable rate in permits per second.
    pub fn rate(&self) -> f64 {
        self.state().lock().unwrap().rate()
    }

    /// Acquires the given number of permits, blocking until they can be
    /// granted. Returns the time spent sleeping, which is zero when permits
    /// were immediately available.
    pub fn acquire(&self, permits: impl Into<NonZeroU32>) -> Duration {
        let wait_micros = self.reserve(permits.into());
        self.clock.sleep_micros(wait_micros);
        Duration::from_micros(wait_micros)
    }

    /// Acquires a single permit. See [`acquire`](Self::acquire).
    pub fn acquire_one(&self) -> Duration {
        self.acquire(NonZeroU32::MIN)
    }

    /// Acquires the given number of permits only if they are available with
    /// no wait at all. Nothing is consumed on failure.
    pub fn try_acquire(&self, permits: impl Into<NonZeroU32>) -> Result<Duration, RateLimited> {
        self.try_acquire_for(permits, Duration::ZERO)
    }

    /// Acquires a single permit only if it is available with no wait.
    pub fn try_acquire_one(&self) -> Result<Duration, RateLimited> {
        self.try_acquire(NonZeroU32::MIN)
    }

    /// Acquires the given number of permits if the wait would not exceed
    /// `timeout`, blocking for the wait when it fits.
    ///
    /// On success returns the time spent sleeping. On failure the limiter's
    /// state is untouched (no permits are consumed and no future caller is
    /// charged) and the error carries the earliest-retry hint.
    pub fn try_acquire_for(
        &self,
        permits: impl Into<NonZeroU32>,
        timeout: Duration,
    ) -> Result<Duration, RateLimited> {
        let permits = permits.into();
        let timeout_micros = saturating_micros(timeout);
        let wait_micros = {
            let mut state = self.state().lock().unwrap();
            let now_micros = self.clock.now_micros();
            let earliest = state.query_earliest_available();
            if unlikely(earliest.saturating_sub(timeout_micros) > now_micros) {
                return Err(RateLimited {
                    earliest_retry: Duration::from_micros(earliest - now_micros),
                });
            }
            let moment = state.reserve_earliest_available(permits.get(), now_micros);
            moment.saturating_sub(now_micros)
        };
        self.clock.sleep_micros(wait_micros);
        Ok(Duration::from_micros(wait_micros))
    }

    /// Reserves permits and returns the length of the wait in microseconds.
    /// This is the only lock-holding portion of an acquire.
    fn reserve(&self, permits: NonZeroU32) -> u64 {
        let mut state = self.state().lock().unwrap();
        let now_micros = self.clock.now_micros();
        let moment = state.reserve_earliest_available(permits.get(), now_micros);
        moment.saturating_sub(now_micros)
    }
}

fn saturating_micros(duration: Duration) -> u64 {
    duration.as_micros().min(u128::from(u64::MAX)) as u64
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RateLimiter[stable_rate={:.1}qps]", self.rate())
    }
}

impl<C: Clock> fmt::Display for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nonzero_ext::nonzero;

    use super::*;
    use crate::clock::ManualClock;

    fn micros(micros: u64) -> Duration {
        Duration::from_micros(micros)
    }

    #[test]
    fn first_acquire_is_free_next_pays() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, Arc::clone(&clock));
        assert_eq!(micros(0), limiter.acquire_one());
        clock.set_micros(50_000);
        // served at the 200ms ticket reserved by the first caller
        assert_eq!(micros(150_000), limiter.acquire_one());
        assert_eq!(200_000, clock.now_micros());
    }

    #[test]
    fn sequential_acquires_converge_to_rate() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(10.0, 1.0, Arc::clone(&clock));
        let n = 30u64;
        for _ in 0..n {
            limiter.acquire_one();
        }
        let elapsed = clock.now_micros();
        let ideal = n * 100_000;
        // within one stable interval of N / rate
        assert!(elapsed.abs_diff(ideal) <= 100_000, "elapsed {elapsed}");
    }

    #[test]
    fn idle_capacity_spent_in_a_burst() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, Arc::clone(&clock));
        clock.advance(Duration::from_secs(2));
        assert_eq!(micros(0), limiter.acquire(nonzero!(5u32)));
        // the first fresh permit is served at once and charged forward
        assert_eq!(micros(0), limiter.acquire_one());
        assert_eq!(micros(200_000), limiter.acquire_one());
    }

    #[test]
    fn acquire_repeated_moments_are_monotonic() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(50.0, 1.0, Arc::clone(&clock));
        let mut last_end = 0;
        for _ in 0..20 {
            limiter.acquire_one();
            let end = clock.now_micros();
            assert!(end >= last_end);
            last_end = end;
        }
    }

    #[test]
    fn try_acquire_zero_timeout_fails_cold() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, Arc::clone(&clock));
        limiter.acquire_one();
        let err = limiter.try_acquire_one().unwrap_err();
        assert_eq!(micros(200_000), err.earliest_retry_after());
        // the failed attempt consumed nothing
        clock.set_micros(200_000);
        assert_eq!(micros(0), limiter.acquire_one());
    }

    #[test]
    fn try_acquire_within_timeout_behaves_like_acquire() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, Arc::clone(&clock));
        limiter.acquire_one();
        let slept = limiter
            .try_acquire_for(nonzero!(1u32), Duration::MAX)
            .unwrap();
        assert_eq!(micros(200_000), slept);
        assert_eq!(200_000, clock.now_micros());
    }

    #[test]
    fn try_acquire_just_over_timeout_fails() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, Arc::clone(&clock));
        limiter.acquire_one();
        assert!(limiter
            .try_acquire_for(nonzero!(1u32), micros(199_999))
            .is_err());
        assert!(limiter
            .try_acquire_for(nonzero!(1u32), micros(200_000))
            .is_ok());
    }

    #[test]
    fn warming_up_drains_slowly_from_cold() {
        let clock = Arc::new(ManualClock::default());
        let limiter =
            RateLimiter::warming_up_with_clock(10.0, Duration::from_secs(2), 3.0, Arc::clone(&clock));
        // the full trapezoid: draining to the threshold costs the warmup period
        assert_eq!(micros(0), limiter.acquire(nonzero!(10u32)));
        assert_eq!(micros(2_000_000), limiter.acquire_one());
    }

    #[test]
    fn warming_up_is_stable_once_warm() {
        let clock = Arc::new(ManualClock::default());
        let limiter =
            RateLimiter::warming_up_with_clock(10.0, Duration::from_secs(2), 3.0, Arc::clone(&clock));
        // drain the whole bucket and pay off the accumulated debt
        limiter.acquire(nonzero!(20u32));
        limiter.acquire_one();
        // from here on every permit is fresh and costs the stable interval
        let before = clock.now_micros();
        limiter.acquire_one();
        limiter.acquire_one();
        assert_eq!(200_000, clock.now_micros() - before);
    }

    #[test]
    fn set_rate_applies_to_waiting_schedule() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, Arc::clone(&clock));
        limiter.acquire_one();
        assert_eq!(5.0, limiter.rate());
        limiter.set_rate(10.0);
        assert_eq!(10.0, limiter.rate());
        // the outstanding 200ms reservation is not forgotten
        assert_eq!(micros(200_000), limiter.acquire_one());
        // but the following permit is served at the new rate
        assert_eq!(micros(100_000), limiter.acquire_one());
    }

    #[test]
    #[should_panic(expected = "rate must be positive")]
    fn zero_rate_is_rejected() {
        let _ = RateLimiter::bursty(0.0);
    }

    #[test]
    #[should_panic(expected = "rate must be positive")]
    fn nan_rate_is_rejected() {
        let _ = RateLimiter::bursty(f64::NAN);
    }

    #[test]
    #[should_panic(expected = "cold factor")]
    fn cold_factor_below_one_is_rejected() {
        let _ = RateLimiter::warming_up_with_clock(
            1.0,
            Duration::from_secs(1),
            0.5,
            ManualClock::default(),
        );
    }

    #[test]
    fn debug_renders_rate() {
        let limiter = RateLimiter::bursty_with_clock(5.0, 1.0, ManualClock::default());
        assert_eq!("RateLimiter[stable_rate=5.0qps]", format!("{limiter:?}"));
    }

    #[test]
    fn contended_acquires_spend_each_permit_once() {
        let clock = Arc::new(ManualClock::default());
        let limiter = Arc::new(RateLimiter::bursty_with_clock(
            1000.0,
            10.0,
            Arc::clone(&clock),
        ));
        // a 10s idle period banks the full 10_000-permit burst capacity
        clock.set_micros(10_000_000);
        std::thread::scope(|s| {
            for _ in 0..4 {
                let limiter = Arc::clone(&limiter);
                s.spawn(move || {
                    for _ in 0..250 {
                        assert_eq!(micros(0), limiter.acquire_one());
                    }
                });
            }
        });
        // exactly 1000 permits were spent from storage: the remaining 9000
        // are still free
        assert_eq!(
            micros(0),
            limiter.try_acquire(nonzero!(9000u32)).unwrap()
        );
        // storage is empty now; the next acquire is served at once but
        // charges its cost forward, so the one after it must wait
        assert_eq!(micros(0), limiter.try_acquire_one().unwrap());
        assert!(limiter.try_acquire_one().is_err());
    }
}
