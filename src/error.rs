use std::time::Duration;

use thiserror::Error;

/// Boxed error type carried by fallible subscriber methods and cache loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned when a permit request cannot be satisfied within its
/// timeout.
///
/// Contains a hint about when the operation can be retried. The limiter's
/// state is untouched when this error is returned: no permits were consumed
/// and no future caller was charged.
///
/// # Examples
///
/// ```rust
/// use sluice::RateLimiter;
///
/// let limiter = RateLimiter::bursty(1.0);
/// limiter.acquire_one();
/// match limiter.try_acquire_one() {
///     Ok(slept) => println!("acquired after {slept:?}"),
///     Err(rate_limited) => {
///         println!("retry in {:?}", rate_limited.earliest_retry_after());
///     }
/// }
/// ```
#[derive(Debug, Error)]
#[error("rate limited; earliest retry after {earliest_retry:?}")]
pub struct RateLimited {
    pub(crate) earliest_retry: Duration,
}

impl RateLimited {
    /// Returns the suggested duration to wait before retrying the operation.
    pub fn earliest_retry_after(&self) -> Duration {
        self.earliest_retry
    }
}

/// Error returned when unregistering a listener that is not currently
/// registered with the bus.
///
/// Listeners must be unregistered with the same `Arc` they were registered
/// with. Removal is not rolled back on failure: subscribers removed before
/// the missing one was discovered stay removed.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("no subscriber registered for listener of type `{listener_type}`; was it registered with this bus?")]
    NotRegistered { listener_type: &'static str },
}

/// Error returned by loading-cache reads when the loader fails.
///
/// The failed load is not cached; a later read for the same key will invoke
/// the loader again.
#[derive(Debug, Error)]
#[error("cache loader failed: {cause}")]
pub struct LoadError {
    pub(crate) cause: BoxError,
}

impl LoadError {
    /// The underlying loader error.
    pub fn into_inner(self) -> BoxError {
        self.cause
    }
}
