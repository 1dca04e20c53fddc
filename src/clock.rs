use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for monotonic clock implementations used by the rate limiter and the
/// cache expiration logic.
///
/// Implementations must provide monotonic time that never goes backwards. The
/// time is measured in microseconds since an arbitrary per-instance origin.
pub trait Clock {
    /// Returns the current time in microseconds since the clock's origin.
    ///
    /// The returned value must be monotonic (never decrease) and should have
    /// sufficient precision for rate limiting purposes.
    fn now_micros(&self) -> u64;

    /// Blocks the caller for approximately `micros` microseconds.
    ///
    /// A request of zero is a no-op. The sleep is uninterruptible: it runs to
    /// completion regardless of signals delivered to the thread.
    fn sleep_micros(&self, micros: u64);
}

/// Standard clock implementation using [`std::time::Instant`].
///
/// # Examples
///
/// ```rust
/// use sluice::{RateLimiter, StdClock};
///
/// let limiter = RateLimiter::bursty_with_clock(100.0, 1.0, StdClock::default());
/// limiter.acquire_one();
/// ```
#[derive(Clone)]
pub struct StdClock {
    origin: std::time::Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Clock for StdClock {
    fn now_micros(&self) -> u64 {
        std::time::Instant::now()
            .duration_since(self.origin)
            .as_micros() as u64
    }

    fn sleep_micros(&self, micros: u64) {
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros));
        }
    }
}

/// High-precision clock implementation using the `quanta` crate.
///
/// Provides the same contract as [`StdClock`] with better calibration on
/// platforms where `Instant` is coarse. Requires the "quanta" feature.
#[cfg(feature = "quanta")]
#[derive(Clone)]
pub struct QuantaClock {
    origin: quanta::Instant,
}

#[cfg(feature = "quanta")]
impl Default for QuantaClock {
    fn default() -> Self {
        Self::new(quanta::Clock::new())
    }
}

#[cfg(feature = "quanta")]
impl QuantaClock {
    /// Creates a new `QuantaClock` from a `quanta::Clock` instance.
    pub fn new(clock: quanta::Clock) -> Self {
        let origin = clock.now();
        Self { origin }
    }
}

#[cfg(feature = "quanta")]
impl Clock for QuantaClock {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_micros(&self, micros: u64) {
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros));
        }
    }
}

/// Manual clock implementation for testing and simulation.
///
/// Allows precise control over time progression, making it ideal for unit
/// tests and deterministic simulations. Sleeping on a manual clock advances
/// the simulated time instead of blocking, so blocking behaviour stays
/// observable without real waits.
///
/// # Thread Safety
///
/// This clock is thread-safe and can be shared across multiple threads.
///
/// # Examples
///
/// ```rust
/// use sluice::{ManualClock, RateLimiter};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::default());
/// let limiter = RateLimiter::bursty_with_clock(10.0, 1.0, Arc::clone(&clock));
///
/// // The first acquire is served immediately; its cost is charged forward.
/// assert_eq!(limiter.acquire_one(), Duration::ZERO);
/// // The next one pays for it.
/// assert_eq!(limiter.acquire_one(), Duration::from_micros(100_000));
/// ```
pub struct ManualClock {
    now: Mutex<u64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    /// Creates a new manual clock starting at the specified time in
    /// microseconds.
    pub fn new(now_micros: u64) -> Self {
        Self {
            now: Mutex::new(now_micros),
        }
    }

    /// Sets the current time to the specified value in microseconds.
    pub fn set_micros(&self, now_micros: u64) {
        let mut guard = self.now.lock().unwrap();
        *guard = now_micros;
    }

    /// Advances the current time by the specified duration.
    pub fn advance(&self, delta: Duration) {
        self.advance_micros(delta.as_micros() as u64);
    }

    /// Advances the current time by the specified number of microseconds.
    pub fn advance_micros(&self, delta: u64) {
        let mut guard = self.now.lock().unwrap();
        *guard += delta;
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        let guard = self.now.lock().unwrap();
        *guard
    }

    fn sleep_micros(&self, micros: u64) {
        self.advance_micros(micros);
    }
}

impl Clock for &ManualClock {
    fn now_micros(&self) -> u64 {
        ManualClock::now_micros(self)
    }

    fn sleep_micros(&self, micros: u64) {
        ManualClock::sleep_micros(self, micros)
    }
}

impl Clock for Arc<ManualClock> {
    fn now_micros(&self) -> u64 {
        ManualClock::now_micros(self)
    }

    fn sleep_micros(&self, micros: u64) {
        ManualClock::sleep_micros(self, micros)
    }
}

impl Clock for Arc<dyn Clock + Send + Sync> {
    fn now_micros(&self) -> u64 {
        self.as_ref().now_micros()
    }

    fn sleep_micros(&self, micros: u64) {
        self.as_ref().sleep_micros(micros)
    }
}
